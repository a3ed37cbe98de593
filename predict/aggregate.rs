// ========================================================================================
//
//                     The prediction aggregator: posterior averaging
//
// ========================================================================================
//
// For every posterior sample, the enabled contributions are added into one shared
// accumulator: the row-topic offsets, the column-topic offsets, and the factorization
// term with its global bias. After the last sample the accumulator is divided by the
// sample count.
//
// The sample loop is sequential on purpose. Every sample writes into the same buffer,
// so each sample's parallel phase must finish before the next one starts. Parallelism
// lives strictly inside a sample, across examples, where writes never alias.

use crate::offsets::{OffsetTerm, TopicAxis, accumulate_offsets};
use crate::threads::{ThreadConfig, par_for_each_example};
use crate::types::{
    Contributions, Dyads, PosteriorSample, PredictError, SampleDims, TopicAssignments,
};
use ndarray::{Array1, ArrayView1};
use rayon::{ThreadPool, ThreadPoolBuildError};

/// A prediction engine bound to its own worker pool.
///
/// Use this when the caller wants an explicit worker count. The free functions
/// [`predict`] and [`partial_residuals`] run on rayon's global pool instead.
pub struct Predictor {
    pool: ThreadPool,
}

impl Predictor {
    pub fn new(config: &ThreadConfig) -> Result<Self, ThreadPoolBuildError> {
        Ok(Self {
            pool: config.build_pool()?,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn predict(
        &self,
        dyads: &Dyads,
        samples: &[PosteriorSample],
        topics: &TopicAssignments,
        contributions: Contributions,
    ) -> Result<Array1<f64>, PredictError> {
        self.pool.install(|| predict(dyads, samples, topics, contributions))
    }

    pub fn partial_residuals(
        &self,
        ratings: ArrayView1<f64>,
        dyads: &Dyads,
        samples: &[PosteriorSample],
        topics: &TopicAssignments,
        contributions: Contributions,
    ) -> Result<Array1<f64>, PredictError> {
        self.pool.install(|| partial_residuals(ratings, dyads, samples, topics, contributions))
    }
}

/// Averages the flag-gated sum of contributions over all posterior samples.
///
/// `topics` is one fixed draw reused for every sample; a missing side is integrated
/// out with each sample's own topic probabilities. The output holds one prediction
/// per dyad, in batch order.
///
/// Only shapes are checked (sample count, length agreement, uniform `(KR, KC, F)`).
/// Entity and topic indices are trusted; an out-of-range index panics.
pub fn predict(
    dyads: &Dyads,
    samples: &[PosteriorSample],
    topics: &TopicAssignments,
    contributions: Contributions,
) -> Result<Array1<f64>, PredictError> {
    let num_dyads = dyads.len();
    topics.check_len(num_dyads)?;
    let dims = SampleDims::uniform(samples)?;

    log::info!(
        "Predicting {num_dyads} dyad(s) from {} posterior sample(s) (KR={}, KC={}, F={}, {:?})",
        samples.len(),
        dims.row_topics,
        dims.col_topics,
        dims.factors,
        contributions
    );

    // Fresh accumulator, zeroed before the first sample.
    let mut preds = vec![0.0f64; num_dyads];

    for (t, sample) in samples.iter().enumerate() {
        if dims.row_topics > 0 && contributions.row_offsets {
            add_offset_term(TopicAxis::Row, dyads, sample, topics, &mut preds);
        }
        if dims.col_topics > 0 && contributions.col_offsets {
            add_offset_term(TopicAxis::Column, dyads, sample, topics, &mut preds);
        }
        if contributions.factorization {
            add_factorization(dyads, sample, dims.factors, &mut preds);
        }
        log::debug!("Accumulated posterior sample {}/{}", t + 1, samples.len());
    }

    let mut preds = Array1::from_vec(preds);
    if samples.len() > 1 {
        let num_samples = samples.len() as f64;
        preds.par_mapv_inplace(|pred| pred / num_samples);
    }

    log::info!("Finished predicting {num_dyads} dyad(s)");
    Ok(preds)
}

/// `ratings - predict(...)`: what is left of each observation once the enabled
/// contributions are removed. This is the quantity a Gibbs step conditions on
/// when resampling the contributions that were switched off.
pub fn partial_residuals(
    ratings: ArrayView1<f64>,
    dyads: &Dyads,
    samples: &[PosteriorSample],
    topics: &TopicAssignments,
    contributions: Contributions,
) -> Result<Array1<f64>, PredictError> {
    if ratings.len() != dyads.len() {
        return Err(PredictError::LengthMismatch {
            what: "rating",
            expected: dyads.len(),
            found: ratings.len(),
        });
    }
    let preds = predict(dyads, samples, topics, contributions)?;
    Ok(&ratings - &preds)
}

fn add_offset_term(
    axis: TopicAxis,
    dyads: &Dyads,
    sample: &PosteriorSample,
    topics: &TopicAssignments,
    preds: &mut [f64],
) {
    // Uniform dims guarantee the block exists whenever its topic count is positive.
    if let Some(term) = OffsetTerm::for_axis(axis, dyads, sample, topics) {
        log::trace!("Adding {}", axis.describe());
        accumulate_offsets(&term, preds);
    }
}

fn add_factorization(dyads: &Dyads, sample: &PosteriorSample, factors: usize, preds: &mut [f64]) {
    let chi = sample.chi;
    if factors == 0 {
        // Bias-only model.
        par_for_each_example(preds, |_, pred| *pred += chi);
        return;
    }

    let (a, b) = (&sample.a, &sample.b);
    let (rows, cols) = (dyads.rows(), dyads.cols());
    par_for_each_example(preds, |e, pred| {
        let a_vec = a.row(rows[e] as usize - 1);
        let b_vec = b.row(cols[e] as usize - 1);
        *pred += chi + a_vec.dot(&b_vec);
    });
}
