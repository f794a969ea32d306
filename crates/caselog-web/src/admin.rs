//! 管理端路由
//!
//! 全部入口先做require_admin判定（每请求读库，禁用或降级立即生效），
//! 再访问跨用户数据。

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::auth::{require_admin, Claims};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use caselog_core::{Case, CaselogError, SystemStats, User, UserCaseCount, UserRole};
use caselog_database::{AdminUserUpdate, CaseFilter};
use serde::Deserialize;
use tracing::info;

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<User>>> {
    require_admin(state.storage.as_ref(), &claims).await?;
    Ok(Json(state.storage.list_users().await?))
}

/// GET /api/admin/users/:userId
pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<User>> {
    require_admin(state.storage.as_ref(), &claims).await?;
    let user = state
        .storage
        .get_user(&user_id)
        .await?
        .ok_or_else(|| CaselogError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

/// PATCH /api/admin/users/:userId - 角色与启用标记
pub async fn update_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
    Json(body): Json<AdminUserRequest>,
) -> ApiResult<Json<User>> {
    require_admin(state.storage.as_ref(), &claims).await?;

    let role = match body.role.as_deref() {
        None => None,
        Some(raw) => Some(UserRole::parse(raw).ok_or_else(|| {
            ApiError(CaselogError::invalid_field(
                "role",
                "role must be \"user\" or \"admin\"",
            ))
        })?),
    };
    let user = state
        .storage
        .admin_update_user(
            &user_id,
            &AdminUserUpdate {
                role,
                is_active: body.is_active,
            },
        )
        .await?
        .ok_or_else(|| CaselogError::NotFound("User not found".to_string()))?;
    info!("Admin {} updated user {}", claims.sub, user_id);
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UserCasesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/admin/user-cases/:userId - 跨用户病例查看的唯一入口
pub async fn user_cases(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
    Query(query): Query<UserCasesQuery>,
) -> ApiResult<Json<Vec<Case>>> {
    require_admin(state.storage.as_ref(), &claims).await?;
    let filter = CaseFilter {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
        ..CaseFilter::default()
    };
    Ok(Json(state.storage.list_cases(&user_id, &filter).await?))
}

/// GET /api/admin/stats/users
pub async fn user_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<UserCaseCount>>> {
    require_admin(state.storage.as_ref(), &claims).await?;
    Ok(Json(state.storage.user_case_counts().await?))
}

/// GET /api/admin/stats/system
pub async fn system_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<SystemStats>> {
    require_admin(state.storage.as_ref(), &claims).await?;
    Ok(Json(state.storage.system_stats().await?))
}
