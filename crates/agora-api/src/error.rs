//! API error handling
//!
//! Failures that happen before a request reaches the task server. Each one
//! is still answered with a JSON-RPC error body so clients can decode every
//! response the same way.

use agora_types::{error_codes, JsonRpcResponse, RequestId, RpcError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or empty {header} header")]
    MissingSecret { header: String },

    #[error("Invalid {header} header")]
    InvalidSecret { header: String },

    #[error("Unreadable request body: {message}")]
    Body { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSecret { .. } | Self::InvalidSecret { .. } => StatusCode::UNAUTHORIZED,
            Self::Body { status, .. } => *status,
        }
    }

    pub fn rpc_error(&self) -> RpcError {
        match self {
            Self::MissingSecret { .. } | Self::InvalidSecret { .. } => RpcError::unauthorized(),
            Self::Body { message, .. } => RpcError::new(error_codes::INVALID_REQUEST, message.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self, "Request refused");
        let body = JsonRpcResponse::failure(RequestId::Null, self.rpc_error());
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_errors_are_unauthorized() {
        let err = ApiError::MissingSecret {
            header: "x-agora-secret".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.rpc_error().code, error_codes::UNAUTHORIZED);
    }

    #[test]
    fn test_body_errors_keep_status() {
        let err = ApiError::Body {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.rpc_error().code, error_codes::INVALID_REQUEST);
    }
}
