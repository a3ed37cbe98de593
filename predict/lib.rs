#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Point predictions for mixed-membership matrix factorization.
//!
//! A trained model is a set of posterior samples drawn by a Gibbs sampler. For each
//! requested (row, column) dyad, [`aggregate::predict`] averages, across samples, the
//! sum of up to three contributions: the low-rank factorization term with its global
//! bias, a row-topic-indexed offset, and a column-topic-indexed offset. The same call
//! with some contributions switched off yields the partial residuals a sampler needs.

pub mod aggregate;
pub mod io;
pub mod offsets;
pub mod threads;
pub mod types;

pub use aggregate::{Predictor, partial_residuals, predict};
pub use types::{
    Contributions, Dyads, PosteriorSample, PredictError, SampleDims, TopicAssignments, TopicBlock,
};
