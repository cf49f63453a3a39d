//! API Middleware

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;

/// Shared-secret header check
#[derive(Debug, Clone)]
pub struct SecretAuth {
    pub header: String,
    /// When set, the header must carry exactly this value; otherwise any
    /// non-empty value is accepted
    pub expected: Option<String>,
}

impl SecretAuth {
    pub fn check(&self, value: Option<&str>) -> Result<(), ApiError> {
        let value = value.map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err(ApiError::MissingSecret {
                header: self.header.clone(),
            });
        }
        match self.expected.as_deref() {
            Some(expected) if expected != value => Err(ApiError::InvalidSecret {
                header: self.header.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Reject requests without the shared-secret header
pub async fn require_secret(
    State(auth): State<Arc<SecretAuth>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let value = req
        .headers()
        .get(auth.header.as_str())
        .and_then(|v| v.to_str().ok());
    auth.check(value)?;
    Ok(next.run(req).await)
}
