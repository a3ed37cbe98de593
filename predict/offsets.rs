// ========================================================================================
//
//                   The offset accumulator: topic-indexed corrections
//
// ========================================================================================
//
// Adds the contribution of one offset table to a batch of running predictions. The
// routine is written from the perspective of the row-topic role: the "primary" entity
// owns the topic, the "secondary" entity selects the offset row. The column-topic role
// is the same computation with the two axes exchanged, which `TopicAxis` makes explicit
// at the call site instead of relying on swapped positional arguments.
//
// Every example writes only its own accumulator slot, so the three paths below run as
// plain data-parallel loops with no synchronization.

use crate::threads::par_for_each_example;
use crate::types::{Dyads, PosteriorSample, TopicAssignments, TopicBlock};

/// The entity axis whose topic drives an offset term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicAxis {
    /// Row topics select columns of `d`; the column entity selects its row.
    Row,
    /// Column topics select columns of `c`; the row entity selects its row.
    Column,
}

impl TopicAxis {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Row => "row-topic offsets",
            Self::Column => "column-topic offsets",
        }
    }
}

/// Everything one offset pass reads, already resolved to a single role.
#[derive(Debug, Clone, Copy)]
pub struct OffsetTerm<'a> {
    /// 1-based indices of the entities that own the topics.
    pub primary: &'a [u32],
    /// 1-based indices of the entities that select the offset row.
    pub secondary: &'a [u32],
    pub block: &'a TopicBlock,
    /// A fixed 1-based topic per example, or `None` to integrate topics out.
    pub assignments: Option<&'a [u32]>,
}

impl<'a> OffsetTerm<'a> {
    /// Resolves the term for `axis` under one posterior sample. Returns `None` when
    /// the sample carries no topics on that axis.
    pub fn for_axis(
        axis: TopicAxis,
        dyads: &'a Dyads,
        sample: &'a PosteriorSample,
        topics: &'a TopicAssignments,
    ) -> Option<Self> {
        match axis {
            TopicAxis::Row => sample.row_topics.as_ref().map(|block| Self {
                primary: dyads.rows(),
                secondary: dyads.cols(),
                block,
                assignments: topics.row.as_deref(),
            }),
            TopicAxis::Column => sample.col_topics.as_ref().map(|block| Self {
                primary: dyads.cols(),
                secondary: dyads.rows(),
                block,
                assignments: topics.col.as_deref(),
            }),
        }
    }
}

/// Adds the term's contribution to `preds`, one slot per example. Never overwrites.
///
/// The path is chosen once per call:
/// - known topics: `offsets[secondary, z]`
/// - `K > 1`, topics integrated out: `sum_k offsets[secondary, k] * exp(log_theta[primary, k])`
/// - `K == 1`, topics integrated out: `offsets[secondary, 0]`, skipping the `exp(ln 1)`
///
/// # Panics
/// Out-of-range indices trip the `ndarray` bounds check. Callers own index validity.
pub fn accumulate_offsets(term: &OffsetTerm<'_>, preds: &mut [f64]) {
    let offsets = &term.block.offsets;
    let secondary = term.secondary;

    match term.assignments {
        Some(z) => {
            log::trace!("Adding offsets under fixed topic assignments");
            par_for_each_example(preds, |e, pred| {
                *pred += offsets[[secondary[e] as usize - 1, z[e] as usize - 1]];
            });
        }
        None if term.block.num_topics() > 1 => {
            log::trace!(
                "Integrating out {} topics for offset contribution",
                term.block.num_topics()
            );
            let log_theta = &term.block.log_theta;
            let primary = term.primary;
            par_for_each_example(preds, |e, pred| {
                let theta = log_theta.row(primary[e] as usize - 1);
                let offset = offsets.row(secondary[e] as usize - 1);
                for (&value, &log_prob) in offset.iter().zip(theta.iter()) {
                    *pred += value * log_prob.exp();
                }
            });
        }
        None => {
            log::trace!("Single topic: adding offsets without weighting");
            par_for_each_example(preds, |e, pred| {
                *pred += offsets[[secondary[e] as usize - 1, 0]];
            });
        }
    }
}
