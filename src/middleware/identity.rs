use axum::{body::Body, http::Request, middleware::Next, response::Response};

use crate::error::AppError;

/// 调用方身份头；认证由上游负责
pub const USER_ID_HEADER: &str = "x-user-id";

/// 当前请求的调用方
#[derive(Debug, Clone)]
pub struct Identity {
    pub uid: String,
}

pub async fn identity_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let uid = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|header| header.to_str().ok())
        .map(str::trim)
        // uid 会拼进存储路径
        .filter(|uid| !uid.is_empty() && !uid.contains('/'))
        .map(str::to_string);

    match uid {
        Some(uid) => {
            request.extensions_mut().insert(Identity { uid });
            Ok(next.run(request).await)
        }
        None => {
            tracing::debug!("Rejected request without {} header", USER_ID_HEADER);
            Err(AppError::Unauthorized)
        }
    }
}
