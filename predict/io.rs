//! # Host Data Exchange
//!
//! Adapters between the prediction core and the outside world. None of this is
//! numeric logic: it only moves data into the fixed-shape structures in `types`
//! and moves predictions back out.
//!
//! - Posterior samples are read from a TOML file holding an array of `[[sample]]`
//!   tables. Matrices use `ndarray`'s serde form (`{ v = 1, dim = [.., ..], data = [..] }`)
//!   and are entity-major. Samples are only ever read here.
//! - Dyads are read from a tab-separated file with a `row` and `col` header and
//!   optional `z_row` / `z_col` columns holding one fixed topic draw.
//! - Predictions are written as tab-separated `row`, `col`, `prediction`.
//! - Hosts that already hold column-major `[K x E]` buffers (the layout most numeric
//!   environments use) convert them with [`marshal_column_major`].

use crate::types::{Dyads, PosteriorSample, PredictError, TopicAssignments, TopicBlock};
use ndarray::{Array2, ArrayView1, ShapeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for moving data in and out of the prediction core.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Could not parse the posterior sample file: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Could not read or write tab-separated data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("A matrix could not be formed from its buffer: {0}")]
    ShapeError(#[from] ShapeError),
    #[error(transparent)]
    PredictError(#[from] PredictError),
    #[error(
        "The '{0}' column is filled on some lines but empty on others. A topic draw must cover every dyad or none."
    )]
    PartialTopicColumn(&'static str),
    #[error(
        "The host buffer for '{field}' holds {found} values, but its shape requires {expected}."
    )]
    BufferLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(Deserialize)]
struct SampleFile {
    #[serde(rename = "sample", default)]
    samples: Vec<PosteriorSample>,
}

/// Parses posterior samples from TOML text.
pub fn parse_samples(text: &str) -> Result<Vec<PosteriorSample>, DataError> {
    let file: SampleFile = toml::from_str(text)?;
    Ok(file.samples)
}

pub fn load_samples(path: &Path) -> Result<Vec<PosteriorSample>, DataError> {
    let text = fs::read_to_string(path)?;
    let samples = parse_samples(&text)?;
    log::info!(
        "Loaded {} posterior sample(s) from {}",
        samples.len(),
        path.display()
    );
    Ok(samples)
}

#[derive(Debug, Deserialize)]
struct DyadRecord {
    row: u32,
    col: u32,
    #[serde(default)]
    z_row: Option<u32>,
    #[serde(default)]
    z_col: Option<u32>,
}

#[derive(Debug, Serialize)]
struct PredictionRecord {
    row: u32,
    col: u32,
    prediction: f64,
}

/// Reads a dyad batch, plus any fixed topic draw it carries, from tab-separated text.
pub fn read_dyads<R: Read>(reader: R) -> Result<(Dyads, TopicAssignments), DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut z_row = Vec::new();
    let mut z_col = Vec::new();
    for record in reader.deserialize::<DyadRecord>() {
        let record = record?;
        rows.push(record.row);
        cols.push(record.col);
        z_row.push(record.z_row);
        z_col.push(record.z_col);
    }

    let topics = TopicAssignments {
        row: collect_topic_column("z_row", z_row)?,
        col: collect_topic_column("z_col", z_col)?,
    };
    Ok((Dyads::new(rows, cols)?, topics))
}

pub fn load_dyads(path: &Path) -> Result<(Dyads, TopicAssignments), DataError> {
    let (dyads, topics) = read_dyads(fs::File::open(path)?)?;
    log::info!("Loaded {} dyad(s) from {}", dyads.len(), path.display());
    Ok((dyads, topics))
}

fn collect_topic_column(
    name: &'static str,
    values: Vec<Option<u32>>,
) -> Result<Option<Vec<u32>>, DataError> {
    let filled = values.iter().filter(|value| value.is_some()).count();
    if filled == 0 {
        return Ok(None);
    }
    if filled != values.len() {
        return Err(DataError::PartialTopicColumn(name));
    }
    Ok(Some(values.into_iter().flatten().collect()))
}

/// Writes one line per dyad, in batch order.
pub fn write_predictions<W: Write>(
    writer: W,
    dyads: &Dyads,
    preds: ArrayView1<f64>,
) -> Result<(), DataError> {
    if preds.len() != dyads.len() {
        return Err(PredictError::LengthMismatch {
            what: "prediction",
            expected: dyads.len(),
            found: preds.len(),
        }
        .into());
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for ((&row, &col), &prediction) in dyads.rows().iter().zip(dyads.cols()).zip(preds.iter()) {
        writer.serialize(PredictionRecord {
            row,
            col,
            prediction,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Entity and topic counts of a host-side model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostShape {
    pub num_rows: usize,
    pub num_cols: usize,
    pub factors: usize,
    pub row_topics: usize,
    pub col_topics: usize,
}

/// One sample as a host hands it over: flat, column-major buffers, one per field.
/// Topic buffers are empty when the matching topic count is zero.
#[derive(Debug, Clone, Default)]
pub struct ColumnMajorSample {
    pub chi: f64,
    /// `[F x R]`
    pub a: Vec<f64>,
    /// `[F x C]`
    pub b: Vec<f64>,
    /// `[KR x R]`
    pub log_theta_row: Vec<f64>,
    /// `[KC x C]`
    pub log_theta_col: Vec<f64>,
    /// `[KC x R]`
    pub c: Vec<f64>,
    /// `[KR x C]`
    pub d: Vec<f64>,
}

/// Converts column-major host buffers into a [`PosteriorSample`].
///
/// A column-major `[K x E]` buffer is the same memory as an entity-major `[E, K]`
/// matrix, so no values are reordered.
pub fn marshal_column_major(
    shape: &HostShape,
    sample: ColumnMajorSample,
) -> Result<PosteriorSample, DataError> {
    let a = entity_major("a", sample.a, shape.num_rows, shape.factors)?;
    let b = entity_major("b", sample.b, shape.num_cols, shape.factors)?;

    let row_topics = if shape.row_topics > 0 {
        Some(TopicBlock {
            log_theta: entity_major(
                "logThetaRow",
                sample.log_theta_row,
                shape.num_rows,
                shape.row_topics,
            )?,
            offsets: entity_major("d", sample.d, shape.num_cols, shape.row_topics)?,
        })
    } else {
        None
    };

    let col_topics = if shape.col_topics > 0 {
        Some(TopicBlock {
            log_theta: entity_major(
                "logThetaCol",
                sample.log_theta_col,
                shape.num_cols,
                shape.col_topics,
            )?,
            offsets: entity_major("c", sample.c, shape.num_rows, shape.col_topics)?,
        })
    } else {
        None
    };

    Ok(PosteriorSample {
        chi: sample.chi,
        a,
        b,
        row_topics,
        col_topics,
    })
}

fn entity_major(
    field: &'static str,
    buffer: Vec<f64>,
    entities: usize,
    width: usize,
) -> Result<Array2<f64>, DataError> {
    let expected = entities * width;
    if buffer.len() != expected {
        return Err(DataError::BufferLength {
            field,
            expected,
            found: buffer.len(),
        });
    }
    Ok(Array2::from_shape_vec((entities, width), buffer)?)
}
