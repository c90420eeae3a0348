use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed sample: expected {expected} channels, got {actual}")]
    Data { expected: usize, actual: usize },
    #[error("no sample delivered within {waited:?}")]
    Stall { waited: Duration },
    #[error("sample source closed the live queue")]
    SourceClosed,
    #[error("failed to persist samples to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f64, actual: f64 },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("live queue already has an active reader")]
    LiveQueueBusy,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl StreamError {
    /// True for the errors that make a session impossible to construct.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            StreamError::Config(_)
                | StreamError::InvalidSampleRate
                | StreamError::SampleRateMismatch { .. }
                | StreamError::ChannelMismatch { .. }
                | StreamError::ConfigIo(_)
                | StreamError::ConfigParse(_)
        )
    }
}
