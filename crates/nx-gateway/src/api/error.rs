//! Admin API errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use nx_core::{ConfigError, IdentityError, TunnelError};

/// Result type for admin handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error returned by an admin handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body or parameters are unusable
    #[error("{0}")]
    BadRequest(String),

    /// The referenced node or tunnel does not exist
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with existing state
    #[error("{0}")]
    Conflict(String),

    /// A bounded resource is used up
    #[error("{0}")]
    Unavailable(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Admin request failed: {}", self);
        }

        let body = serde_json::json!({
            "success": false,
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<TunnelError> for ApiError {
    fn from(e: TunnelError) -> Self {
        match e {
            TunnelError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TunnelError::PortInUse { .. } => ApiError::Conflict(e.to_string()),
            TunnelError::PortOutOfRange { .. } => ApiError::BadRequest(e.to_string()),
            TunnelError::PortsExhausted { .. } => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::Internal(format!("Failed to save console settings: {}", e))
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        ApiError::Internal(format!("Failed to regenerate SSH key: {}", e))
    }
}
