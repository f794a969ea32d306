//! 错误到HTTP响应的映射
//!
//! 校验错误携带字段级明细返回400；内部错误只回generic消息，细节进服务端日志。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use caselog_core::CaselogError;
use serde_json::json;
use tracing::error;

/// HTTP层错误包装
#[derive(Debug)]
pub struct ApiError(pub CaselogError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl<E> From<E> for ApiError
where
    E: Into<CaselogError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            CaselogError::Invalid(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "Validation failed",
                    "errors": errors,
                }),
            ),
            CaselogError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "message": msg }),
            ),
            CaselogError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": msg }),
            ),
            CaselogError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "message": msg }),
            ),
            CaselogError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "message": msg }),
            ),
            CaselogError::Upload(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "message": msg }),
            ),
            // 内部细节不下发
            other => {
                error!("Internal error serving request: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caselog_core::FieldError;

    #[test]
    fn validation_maps_to_400() {
        let response =
            ApiError(CaselogError::Validation("bad input".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn field_errors_map_to_400() {
        let response = ApiError(CaselogError::Invalid(vec![FieldError::new(
            "caseDate",
            "required",
        )]))
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        let response =
            ApiError(CaselogError::Unauthorized("no session".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            ApiError(CaselogError::Forbidden("admin only".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn database_errors_hide_detail() {
        let response =
            ApiError(CaselogError::Database("connection refused at 10.0.0.3".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
