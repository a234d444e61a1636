use thiserror::Error;

use crate::store::metadata::Stage;

/// Result alias for pipeline and store operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the orchestrator and the stores.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Operation attempted outside the stage it requires.
    #[error("invalid state: expected stage {expected}, pipeline is at {actual}")]
    InvalidState { expected: Stage, actual: Stage },
    /// Stage transition that does not move forward by exactly one.
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("upstream strategy failure: {0}")]
    Strategy(StrategyError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Errors raised by chunking, embedding and clustering strategies.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("training source must be passed before training")]
    MissingTrainingSource,
    #[error("train must be called before classifying")]
    NotTrained,
    #[error("{0}")]
    Failed(String),
    /// A store error raised while a strategy read through its training handle.
    #[error(transparent)]
    Store(Box<PipelineError>),
}

impl StrategyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<PipelineError> for StrategyError {
    fn from(err: PipelineError) -> Self {
        Self::Store(Box::new(err))
    }
}

impl From<StrategyError> for PipelineError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::MissingTrainingSource => {
                Self::ConfigurationConflict(StrategyError::MissingTrainingSource.to_string())
            }
            StrategyError::Store(inner) => *inner,
            other => Self::Strategy(other),
        }
    }
}
