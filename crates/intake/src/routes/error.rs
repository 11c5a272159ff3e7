//! JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nodegate_common::{ErrorBody, NodegateError};

use crate::allocator::AllocError;
use crate::cluster::ClusterError;

/// Handler error, rendered as `{"error": kind, "detail": message}`
#[derive(Debug)]
pub struct ApiError(pub NodegateError);

impl ApiError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self(NodegateError::InvalidInput(detail.into()))
    }
}

impl From<NodegateError> for ApiError {
    fn from(err: NodegateError) -> Self {
        Self(err)
    }
}

impl From<AllocError> for ApiError {
    fn from(err: AllocError) -> Self {
        Self(err.into())
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            detail: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
