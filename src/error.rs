use thiserror::Error;

/// Errors surfaced by the guidance library.
///
/// None of these end a session: sensor and output failures are reported and
/// the engine keeps running in degraded mode.
#[derive(Debug, Error)]
pub enum GuideError {
    #[error("malformed event on line {line}: {message}")]
    Event { line: usize, message: String },

    #[error("gpsd unavailable at {host}:{port}: {message}")]
    Gps {
        host: String,
        port: u16,
        message: String,
    },

    #[error("speech backend failed: {0}")]
    Speech(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = GuideError> = std::result::Result<T, E>;
