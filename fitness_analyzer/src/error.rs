use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("fallback copy {path} could not be read: {reason}")]
    FallbackUnreadable { path: PathBuf, reason: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("missing required column '{column}' in {table}")]
    MissingColumn { table: String, column: String },

    #[error("invalid measurement for sgRNA {sgrna}: {reason}")]
    InvalidMeasurement { sgrna: String, reason: String },

    #[error("gene-level table has conflicting rows for locus {locus} under condition {condition}")]
    GeneLevelConflict { locus: String, condition: String },

    #[error("pivot conflict for key [{key}] and condition {condition}: {first} vs {second}")]
    PivotConflict {
        key: String,
        condition: String,
        first: String,
        second: String,
    },

    #[error("gene {gene} has no value under condition {condition}; filter to complete profiles before clustering")]
    IncompleteProfile { gene: String, condition: String },

    #[error("figure rendering failed for {path}: {reason}")]
    Figure { path: PathBuf, reason: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure of a single remote retrieval. Never leaves the fetcher: it only
/// becomes the `reason` recorded on a fallback.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    Empty { url: String },

    #[error("source disabled (offline mode)")]
    Offline,
}
