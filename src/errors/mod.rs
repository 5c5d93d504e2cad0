/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Substrings that mark a remote failure as a credential rejection.
///
/// The remote service has no structured error codes, so failures are
/// classified by their text. Matching is case-insensitive.
pub const AUTH_ERROR_TOKENS: &[&str] = &[
    "invalid",
    "ogiltig",
    "auth",
    "unauthorized",
    "forbidden",
    "401",
    "403",
];

/// Returns true when an error message looks like a credential rejection
pub fn is_auth_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    AUTH_ERROR_TOKENS
        .iter()
        .any(|token| lowered.contains(token))
}

/// Errors raised by the remote logbook client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("API error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Outcome classes of a credential validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cannot connect: {0}")]
    CannotConnect(String),
    #[error("invalid authentication: {0}")]
    InvalidAuth(String),
    #[error("unexpected error: {0:#}")]
    Unknown(#[from] anyhow::Error),
}

impl ValidationError {
    /// Reclassify a failure raised inside a remote session
    pub fn from_remote(err: &ClientError) -> Self {
        let message = err.to_string();
        if is_auth_error(&message) {
            ValidationError::InvalidAuth(message)
        } else {
            ValidationError::CannotConnect(message)
        }
    }

    /// Error code shown on the flow form
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::CannotConnect(_) => codes::CANNOT_CONNECT,
            ValidationError::InvalidAuth(_) => codes::INVALID_AUTH,
            ValidationError::Unknown(_) => codes::UNKNOWN,
        }
    }
}

/// Failure of a scheduled refresh
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpdateFailed {
    #[error("Authentication failed, please re-authenticate")]
    AuthenticationFailed,
    #[error("{0}")]
    Fetch(String),
}

/// Reasons a configured instance could not be set up
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid configuration entry: {0}")]
    InvalidEntry(String),
    #[error("instance not ready: {0}")]
    NotReady(#[from] UpdateFailed),
}

/// Errors raised by the config-entry store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no configuration entry stored")]
    Missing,
}

/// Errors raised by the flow manager outside of a form step
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown flow: {0}")]
    UnknownFlow(u64),
    #[error("flow input does not match step {step}")]
    UnexpectedInput { step: &'static str },
    #[error("no configuration entry to {0}")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error codes surfaced to the user-facing flow
pub mod codes {
    pub const CANNOT_CONNECT: &str = "cannot_connect";
    pub const INVALID_AUTH: &str = "invalid_auth";
    pub const UNKNOWN: &str = "unknown";
    pub const NO_AIRPLANES_SELECTED: &str = "no_airplanes_selected";
    pub const REAUTH_SUCCESSFUL: &str = "reauth_successful";
}

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Flow(FlowError),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Flow(e) => write!(f, "Flow error: {}", e),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError::Flow(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Flow(FlowError::UnknownFlow(id)) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_FLOW",
                format!("unknown flow: {}", id),
            ),
            ApiError::Flow(e) => (StatusCode::OK, "FLOW_ERROR", e.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::OK, "INTERNAL_ERROR", msg.clone()),
        };

        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
