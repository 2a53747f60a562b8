use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::opendata::SourceError;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] BadRequest(String),
    #[error("{0}")] Unauthorized(String),
    #[error("forbidden")] Forbidden,
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(String),
    #[error("too many requests")] TooManyRequests,
    #[error("upstream failure: {0}")] Upstream(String),
    #[error("internal error")] Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict(msg) => ApiError::Conflict(msg),
            RepoError::Internal(msg) => {
                tracing::error!(error = %msg, "repository failure");
                ApiError::Internal
            }
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        tracing::warn!(error = %e, "open data request failed");
        ApiError::Upstream(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
