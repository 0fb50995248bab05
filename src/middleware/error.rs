use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::session::SessionError;
use crate::store::StoreError;

/// Authentication errors for the boundary layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No valid session on the request.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Client-supplied input failed validation.
    #[error("Unprocessable: {0}")]
    Validation(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data-integrity or call-sequencing bug; should never occur in
    /// correct operation and is worth alerting on.
    #[error("Internal session error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            Self::Validation(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, detail).into_response()
            }
            Self::Config(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Session internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::SessionTooOld
            | SessionError::SessionVersionInvalid(_)
            | SessionError::OAuth(_) => Self::Unauthenticated,
            SessionError::UnknownAttribute(name) => {
                Self::Validation(format!("unknown attribute {name:?}"))
            }
            SessionError::Store(StoreError::Validation(detail)) => Self::Validation(detail),
            other => Self::Internal(other.to_string()),
        }
    }
}
