//! Error taxonomy for the attribution pipeline.
//!
//! Retries are local to the analyzer and composer. Once a retry budget is
//! spent exactly one terminal error escapes, carrying the last cause.
//!
//! HTTP mappings for the surrounding service:
//! - `InvalidInput`, `InvalidState` → 400
//! - `NotFound` → 404
//! - `SourceUnavailable`, `Transport`, `AnalysisFailed`, `MessageGenerationFailed` → 502
//! - `MalformedResponse`, `Store`, `Config` → 500

use crate::judgment::Intensity;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CourtError {
    #[error("Commit source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("LLM transport failure: {0}")]
    Transport(String),

    #[error("Analysis failed after {attempts} attempts: {source}")]
    AnalysisFailed {
        attempts: u32,
        #[source]
        source: Box<CourtError>,
    },

    #[error("Generating {intensity} messages failed after {attempts} attempts: {source}")]
    MessageGenerationFailed {
        intensity: Intensity,
        attempts: u32,
        #[source]
        source: Box<CourtError>,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Judgment not found: {0}")]
    NotFound(Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CourtError {
    /// Whether the analyzer/composer retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CourtError::MalformedResponse(_) | CourtError::Transport(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CourtError::InvalidInput(_) | CourtError::InvalidState(_) => 400,
            CourtError::NotFound(_) => 404,
            CourtError::SourceUnavailable(_)
            | CourtError::Transport(_)
            | CourtError::AnalysisFailed { .. }
            | CourtError::MessageGenerationFailed { .. } => 502,
            CourtError::MalformedResponse(_) | CourtError::Store(_) | CourtError::Config(_) => 500,
        }
    }
}

impl From<serde_json::Error> for CourtError {
    fn from(err: serde_json::Error) -> Self {
        CourtError::MalformedResponse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CourtError>;
