use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Prometheus query failed: {0}")]
    Upstream(String),

    #[error("Expected matrix result, got {0}")]
    UnexpectedShape(String),

    #[error("Chart encoding failed: {0}")]
    Encoding(String),

    #[error("Invalid parameter: {0}")]
    Validation(String),

    #[error("Invalid auth token (t)")]
    Forbidden,
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Upstream(err.to_string())
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RenderError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
            ),
            RenderError::Forbidden => (
                StatusCode::FORBIDDEN,
                self.to_string(),
            ),
            RenderError::Connection(_)
            | RenderError::Upstream(_)
            | RenderError::UnexpectedShape(_)
            | RenderError::Encoding(_) => {
                // Full detail goes to the server log; clients get a generic body.
                error!(err = %self, "graph request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
