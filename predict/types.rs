// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ndarray::Array2;
use serde::Deserialize;
use thiserror::Error;

/// A batch of dyads to predict. Indices are 1-based into the row and column
/// entity spaces, exactly as the sampler stores them.
///
/// The constructor guarantees both index arrays have the same length, so every
/// downstream loop can treat `N` as a single number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dyads {
    rows: Vec<u32>,
    cols: Vec<u32>,
}

impl Dyads {
    pub fn new(rows: Vec<u32>, cols: Vec<u32>) -> Result<Self, PredictError> {
        if rows.len() != cols.len() {
            return Err(PredictError::LengthMismatch {
                what: "column index",
                expected: rows.len(),
                found: cols.len(),
            });
        }
        Ok(Self { rows, cols })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    #[inline]
    pub fn cols(&self) -> &[u32] {
        &self.cols
    }
}

/// One fixed topic draw, shared by every posterior sample in a call.
/// An absent side means that side's topics are integrated out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicAssignments {
    /// 1-based row-topic per dyad, in `1..=KR`.
    pub row: Option<Vec<u32>>,
    /// 1-based column-topic per dyad, in `1..=KC`.
    pub col: Option<Vec<u32>>,
}

impl TopicAssignments {
    /// Integrate out both sides.
    pub fn integrated() -> Self {
        Self::default()
    }

    pub fn check_len(&self, num_dyads: usize) -> Result<(), PredictError> {
        for (what, draw) in [("row topic", &self.row), ("column topic", &self.col)] {
            if let Some(z) = draw {
                if z.len() != num_dyads {
                    return Err(PredictError::LengthMismatch {
                        what,
                        expected: num_dyads,
                        found: z.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Which terms are summed into each prediction. Mid-sampling callers switch
/// terms off to obtain partial residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contributions {
    /// `chi + <a_r, b_c>`.
    pub factorization: bool,
    /// Offset driven by the row entity's topic (table `d`).
    pub row_offsets: bool,
    /// Offset driven by the column entity's topic (table `c`).
    pub col_offsets: bool,
}

impl Contributions {
    pub const ALL: Self = Self {
        factorization: true,
        row_offsets: true,
        col_offsets: true,
    };

    pub const NONE: Self = Self {
        factorization: false,
        row_offsets: false,
        col_offsets: false,
    };
}

impl Default for Contributions {
    fn default() -> Self {
        Self::ALL
    }
}

/// The tables belonging to one topic role.
///
/// Both matrices are entity-major: one row per entity, one column per topic.
/// For the row-topic role `log_theta` is `[R, KR]` and `offsets` (the model's `d`)
/// is `[C, KR]`. For the column-topic role `log_theta` is `[C, KC]` and `offsets`
/// (the model's `c`) is `[R, KC]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopicBlock {
    /// Natural-log topic probabilities of the block's own entities. Rows are assumed
    /// to be normalized upstream; nothing here renormalizes them.
    pub log_theta: Array2<f64>,
    /// Offset table indexed by (other-axis entity, own topic).
    pub offsets: Array2<f64>,
}

impl TopicBlock {
    #[inline]
    pub fn num_topics(&self) -> usize {
        self.log_theta.ncols()
    }
}

/// One posterior draw of every latent parameter of the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PosteriorSample {
    /// Global bias.
    pub chi: f64,
    /// Row latent factors, `[R, F]`.
    pub a: Array2<f64>,
    /// Column latent factors, `[C, F]`.
    pub b: Array2<f64>,
    /// Present iff KR > 0.
    #[serde(default)]
    pub row_topics: Option<TopicBlock>,
    /// Present iff KC > 0.
    #[serde(default)]
    pub col_topics: Option<TopicBlock>,
}

impl PosteriorSample {
    pub fn dims(&self) -> SampleDims {
        SampleDims {
            row_topics: self.row_topics.as_ref().map_or(0, TopicBlock::num_topics),
            col_topics: self.col_topics.as_ref().map_or(0, TopicBlock::num_topics),
            factors: self.a.ncols(),
        }
    }
}

/// `(KR, KC, F)`. Must be identical across all samples of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDims {
    pub row_topics: usize,
    pub col_topics: usize,
    pub factors: usize,
}

impl SampleDims {
    /// Reads the dimensions from the first sample and checks that every sample,
    /// and every table inside it, agrees.
    ///
    /// Only shapes are compared; index ranges of the dyads are never checked.
    pub fn uniform(samples: &[PosteriorSample]) -> Result<Self, PredictError> {
        let first = samples.first().ok_or(PredictError::NoSamples)?;
        let dims = first.dims();
        let rows = first.a.nrows();
        let cols = first.b.nrows();

        for (index, sample) in samples.iter().enumerate() {
            let found = sample.dims();
            let mismatch = |field: &'static str, expected: usize, found: usize| {
                PredictError::InconsistentDimensions {
                    sample: index,
                    field,
                    expected,
                    found,
                }
            };

            if found.row_topics != dims.row_topics {
                return Err(mismatch("row topic count", dims.row_topics, found.row_topics));
            }
            if found.col_topics != dims.col_topics {
                return Err(mismatch("column topic count", dims.col_topics, found.col_topics));
            }
            if found.factors != dims.factors {
                return Err(mismatch("factor count (a)", dims.factors, found.factors));
            }
            if sample.b.ncols() != dims.factors {
                return Err(mismatch("factor count (b)", dims.factors, sample.b.ncols()));
            }
            if sample.a.nrows() != rows {
                return Err(mismatch("row entity count (a)", rows, sample.a.nrows()));
            }
            if sample.b.nrows() != cols {
                return Err(mismatch("column entity count (b)", cols, sample.b.nrows()));
            }
            if let Some(block) = &sample.row_topics {
                let width = block.offsets.ncols();
                if width != dims.row_topics {
                    return Err(mismatch("row topic count (d)", dims.row_topics, width));
                }
                let theta_rows = block.log_theta.nrows();
                if theta_rows != rows {
                    return Err(mismatch("row entity count (logThetaRow)", rows, theta_rows));
                }
                let offset_rows = block.offsets.nrows();
                if offset_rows != cols {
                    return Err(mismatch("column entity count (d)", cols, offset_rows));
                }
            }
            if let Some(block) = &sample.col_topics {
                let width = block.offsets.ncols();
                if width != dims.col_topics {
                    return Err(mismatch("column topic count (c)", dims.col_topics, width));
                }
                let theta_rows = block.log_theta.nrows();
                if theta_rows != cols {
                    return Err(mismatch("column entity count (logThetaCol)", cols, theta_rows));
                }
                let offset_rows = block.offsets.nrows();
                if offset_rows != rows {
                    return Err(mismatch("row entity count (c)", rows, offset_rows));
                }
            }
        }

        Ok(dims)
    }
}

/// The precondition violations a prediction call reports instead of computing garbage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictError {
    #[error("At least one posterior sample is required to form a prediction.")]
    NoSamples,
    #[error("The {what} array has {found} entries, but the batch holds {expected} dyads.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(
        "Posterior sample {sample} has {field} = {found}, but {expected} was expected. All samples in one call must share the same shape."
    )]
    InconsistentDimensions {
        sample: usize,
        field: &'static str,
        expected: usize,
        found: usize,
    },
}
