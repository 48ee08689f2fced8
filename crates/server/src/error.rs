use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors for the plain JSON routes (registration, login, model registry).
///
/// The chat endpoint never uses this type: once its response is committed to
/// a streaming content type, failures travel in-band as error chunks.
#[derive(Debug, Error)]
pub(crate) enum ApiError {
    /// The request body is unusable.
    #[error("{0}")]
    BadRequest(String),

    /// Credentials were wrong or missing.
    #[error("invalid credentials")]
    Unauthorized,

    /// The caller is authenticated but not allowed to do this.
    #[error("insufficient role")]
    Forbidden,

    /// A uniqueness constraint would be violated.
    #[error("{0} is already taken")]
    Conflict(String),

    /// Something failed server-side; details are in the log, not the response.
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<storage::StorageError> for ApiError {
    fn from(error: storage::StorageError) -> Self {
        log::error!("Storage failure in API route: {error}");
        Self::Internal
    }
}

impl From<auth::MintError> for ApiError {
    fn from(error: auth::MintError) -> Self {
        log::error!("Failed to mint credential: {error}");
        Self::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            log::error!("API route failed ({}): {self}", status.as_u16());
        }

        let body = json!({
            "success": false,
            "code": status.as_u16(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
