use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

/// The crate-wide error taxonomy. Every server-facing failure is shaped into
/// one of these before it reaches an HTTP response or a signaling `error`
/// frame; nothing propagates to the caller as a raw panic or transport error.
#[derive(Debug, Error, Clone)]
pub enum RdmError {
    #[error("not found")]
    NotFound,
    #[error("incorrect password")]
    AuthFailure,
    #[error("{0}")]
    Forbidden(String),
    #[error("file exceeds the upload size cap")]
    PayloadTooLarge,
    #[error("too many join attempts, try again later")]
    RateLimited,
    #[error("{0}")]
    MalformedInput(String),
    #[error("transport error")]
    Transient,
    #[error("{0}")]
    Timeout(String),
}

impl RdmError {
    pub fn status(&self) -> StatusCode {
        match self {
            RdmError::NotFound => StatusCode::NOT_FOUND,
            RdmError::AuthFailure => StatusCode::FORBIDDEN,
            RdmError::Forbidden(_) => StatusCode::FORBIDDEN,
            RdmError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RdmError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RdmError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            RdmError::Transient => StatusCode::INTERNAL_SERVER_ERROR,
            RdmError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl warp::reject::Reject for RdmError {}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&RdmError> for ErrorBody {
    fn from(err: &RdmError) -> Self {
        Self {
            error: err.message(),
        }
    }
}
