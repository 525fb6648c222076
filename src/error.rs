use thiserror::Error;

/// Main error type for the subtitle pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("probe error: {0}")]
    Probe(String),

    #[error("split error: {0}")]
    Split(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
