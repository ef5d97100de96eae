use thiserror::Error;

/// Failures raised by the read/write orchestration, each carrying an
/// HTTP status.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A nested front-door call failed; status and message are kept as-is.
    #[error("{message}")]
    Upstream { status: u16, message: String },
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Internal(_) => 500,
            ApiError::Upstream { status, .. } => *status,
        }
    }
}
