use std::path::PathBuf;
use thiserror::Error;

pub type SeedResult<T> = Result<T, SeedError>;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("demo data file {path} could not be read: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("time range must be between 1 and 366 days, got {0}")]
    InvalidTimeRange(u32),
    #[error("weighted pick needs at least one positive weight")]
    EmptyWeights,
    #[error("unknown destination: {0}")]
    UnknownDestination(String),
    #[error("an import for destination {0} is already running")]
    AlreadyRunning(String),
    #[error("import cancelled")]
    Cancelled,
    #[error("demo catalog error: {0}")]
    Catalog(String),
}

impl SeedError {
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }
}

/// A destination write failed. `message` is the backend's error text.
#[derive(Debug, Clone, Error)]
#[error("{destination} delivery failed: {message}")]
pub struct DeliveryError {
    pub destination: String,
    pub message: String,
}

impl DeliveryError {
    pub fn new(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            message: message.into(),
        }
    }
}
