use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Handler error. Rendered as a plaintext body with the raw message.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] adsync_core::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Core(err) => match err {
                adsync_core::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                adsync_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (code, self.to_string()).into_response()
    }
}
