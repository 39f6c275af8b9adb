//! Mapping of [`VaultError`] onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::ErrorResponse;
use common::VaultError;
use tracing::{error, warn};

/// Handler error: a [`VaultError`] rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Server-side details stay in the log.
        let message = match &self.0 {
            VaultError::Store(_) => {
                warn!(error = %self.0, "record store failure");
                "record store unavailable".to_owned()
            }
            VaultError::Config(_) | VaultError::Internal(_) => {
                error!(error = %self.0, "internal failure");
                "internal error".to_owned()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(self.0.code(), message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_error() {
        let resp = ApiError(VaultError::DecryptionFailed).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiError(VaultError::KeyUnavailable("v3".into())).into_response();
        assert_eq!(resp.status(), StatusCode::GONE);

        let resp = ApiError(VaultError::Store("pg: connection refused".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
