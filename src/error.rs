use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::models::RequestStatus;
use crate::utils::error_codes;

/// 文档存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("document must be a JSON object: {0}")]
    InvalidDocument(String),
    #[error("subscription closed")]
    Closed,
}

/// 行程请求生命周期错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("cannot move request from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("user {uid} may not move request to {to}")]
    NotPermitted { uid: String, to: RequestStatus },
}

/// 资料服务错误
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP 接口错误
#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    BadRequest(String),
    NotFound,
    Conflict(String),
    Forbidden(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error_message: String,
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            RequestError::NotPermitted { .. } => AppError::Forbidden(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "未授权访问".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound => (StatusCode::NOT_FOUND, "请求不存在".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
        };

        // 参数校验失败使用业务码，其余沿用 HTTP 状态码
        let code = if status == StatusCode::BAD_REQUEST {
            error_codes::VALIDATION_ERROR
        } else {
            status.as_u16() as i32
        };
        let body = Json(ErrorResponse {
            code,
            error_message,
        });

        (status, body).into_response()
    }
}
