use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use anas_core::AnasError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub active_benchmarks: usize,
}

/// An [`AnasError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub AnasError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AnasError::NotFound(_) => StatusCode::NOT_FOUND,
            AnasError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.status().as_u16(),
            message: self.0.to_string(),
        }
    }
}

impl From<AnasError> for ApiError {
    fn from(err: AnasError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (status, Json(self.body())).into_response()
    }
}
