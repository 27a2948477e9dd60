#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Pass-predictor engine: interactive binary logistic regression over
//! study hours and attendance, trained one gradient step per tick.

/// Engine and data-loading errors.
#[path = "../error.rs"]
pub mod error;

/// Raw samples, CSV loading and dataset summaries.
#[path = "../dataset.rs"]
pub mod dataset;

/// Z-score normalization.
#[path = "../normalizer.rs"]
pub mod normalizer;

/// Weights, sigmoid hypothesis, loss and gradient.
#[path = "../model.rs"]
pub mod model;

/// Run state machine and loss history.
#[path = "../trainer.rs"]
pub mod trainer;

/// Session orchestration and predictions.
#[path = "../session.rs"]
pub mod session;

/// Tick-driven async training loop.
#[path = "../runner.rs"]
pub mod runner;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use config::{ConfigOverrides, TutorConfig};
pub use dataset::{Dataset, DatasetLoader, DatasetSummary, RawPoint, Sample};
pub use error::{DataLoadError, EngineError};
pub use model::{LogisticModel, WeightVector};
pub use normalizer::{NormalizationParams, Normalizer};
pub use runner::{LoopExit, LoopSummary, SharedSession, TrainingLoop};
pub use session::{Prediction, Session, SessionBuilder, SessionSnapshot};
pub use telemetry::{TutorTelemetry, TutorTelemetryBuilder};
pub use trainer::{LossSample, StartKind, StepOutcome, TrainerState, TrainingRunState};
