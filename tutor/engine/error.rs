use thiserror::Error;

use crate::trainer::TrainerState;

/// Failures raised while reading a dataset source.
#[derive(Debug, Error)]
pub enum DataLoadError {
    /// Unreadable file or malformed delimited text.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Header lacks a required column.
    #[error("missing column `{0}` in header")]
    MissingColumn(String),
    /// A feature value is not a finite number.
    #[error("line {line}: column `{column}` has non-finite value {value}")]
    InvalidValue {
        /// 1-based line number including the header.
        line: u64,
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: f64,
    },
    /// The label is neither 0 nor 1.
    #[error("line {line}: `passed` must be 0 or 1, got {value}")]
    InvalidLabel {
        /// 1-based line number including the header.
        line: u64,
        /// Offending value.
        value: f64,
    },
}

/// Errors raised by the estimation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The dataset source could not be read or parsed.
    #[error("failed to load dataset: {0}")]
    DataLoad(#[from] DataLoadError),
    /// The source parsed but held zero samples.
    #[error("dataset contains no usable samples")]
    EmptyDataset,
    /// Loss or gradient became non-finite.
    #[error("numeric instability at iteration {iteration}: {detail}")]
    NumericInstability {
        /// Iteration whose step was rejected.
        iteration: usize,
        /// What went non-finite.
        detail: String,
    },
    /// Training or prediction requested before any dataset was loaded.
    #[error("no dataset loaded")]
    DatasetNotLoaded,
    /// Iteration budget below one.
    #[error("total iterations must be at least 1, got {0}")]
    InvalidIterations(usize),
    /// Mutation refused while a run is in progress.
    #[error("cannot change {0} while training is running")]
    TrainingActive(&'static str),
    /// `step` called outside the running state.
    #[error("step requested while trainer is {0:?}")]
    NotRunning(TrainerState),
    /// Broken internal invariant.
    #[error("internal trainer fault: {0}")]
    Internal(String),
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
