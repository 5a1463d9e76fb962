//! Error taxonomy for omics-statistics.
//!
//! Operations return `anyhow::Result`; every error raised by this crate carries an
//! [`AnalysisError`] so callers can recover the kind with `downcast_ref`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Duplicate {kind} identifier '{id}'")]
    DuplicateIdentifier { kind: &'static str, id: String },

    #[error("Column '{0}' collides with the grouping column or a feature")]
    ColumnCollision(String),

    #[error("{count} sample(s) have no match in the metadata (e.g. '{example}')")]
    UnmatchedSamples { count: usize, example: String },

    #[error("Empty table: {0}")]
    EmptyTable(String),

    #[error("Column '{column}' needs at least 2 distinct non-missing levels, found {found}")]
    InsufficientGroups { column: String, found: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl AnalysisError {
    /// Recover the taxonomy from an `anyhow::Error` produced by this crate.
    pub fn kind_of(err: &anyhow::Error) -> Option<&AnalysisError> {
        err.downcast_ref::<AnalysisError>()
    }
}
