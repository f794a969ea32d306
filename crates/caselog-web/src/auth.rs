//! 认证与授权
//!
//! 认证委托给外部OIDC提供方：登录重定向到授权端点，回调换取token并拉取
//! userinfo，随后以会话cookie维持登录态。每个请求在中间件里按subject惰性
//! upsert用户记录，保持用户表与身份提供方同步。管理员判定每请求读库，
//! 不做跨请求缓存，避免过期权限窗口。

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Extension, Json,
};
use caselog_admin::AppConfig;
use caselog_core::utils::is_valid_theme;
use caselog_core::{CaselogError, Result, User, UserRole};
use caselog_database::{Storage, UpdateUser, UpsertUser};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const SESSION_COOKIE: &str = "caselog_session";
/// 登录state的有效窗口
const LOGIN_STATE_TTL_MINUTES: i64 = 10;

/// 会话携带的规范化声明
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    claims: Claims,
    expires_at: DateTime<Utc>,
}

/// OIDC token端点响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OIDC userinfo端点响应
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

/// 认证服务
#[derive(Clone)]
pub struct AuthService {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    login_states: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl AuthService {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            login_states: Arc::new(RwLock::new(HashMap::new())),
            http: reqwest::Client::new(),
            config,
        }
    }

    fn callback_url(&self) -> String {
        format!("{}/api/auth/callback", self.config.server.base_url)
    }

    /// 生成并登记一次性登录state
    pub async fn issue_state(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.login_states
            .write()
            .await
            .insert(state.clone(), Utc::now());
        state
    }

    /// 核销登录state；未登记或超窗返回false
    pub async fn take_state(&self, state: &str) -> bool {
        let mut states = self.login_states.write().await;
        let cutoff = Utc::now() - Duration::minutes(LOGIN_STATE_TTL_MINUTES);
        states.retain(|_, issued| *issued >= cutoff);
        states.remove(state).is_some()
    }

    /// 授权端点URL
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&scope=openid%20email%20profile&state={}",
            self.config.auth.issuer_url, self.config.auth.client_id, self.callback_url(), state
        )
    }

    /// 授权码换token，再取userinfo
    async fn exchange_code(&self, code: &str) -> Result<UserInfo> {
        let token_url = format!("{}/token", self.config.auth.issuer_url);
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.config.auth.client_id),
            ("client_secret", &self.config.auth.client_secret),
            ("redirect_uri", &self.callback_url()),
        ];

        let token: TokenResponse = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))?
            .error_for_status()
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))?
            .json()
            .await
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))?;

        let userinfo_url = format!("{}/userinfo", self.config.auth.issuer_url);
        self.http
            .get(&userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))?
            .error_for_status()
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))?
            .json()
            .await
            .map_err(|e| CaselogError::IdentityProvider(e.to_string()))
    }

    /// 建立会话，返回cookie token
    pub async fn create_session(&self, claims: Claims) -> Uuid {
        let token = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::hours(self.config.auth.session_ttl_hours);
        self.sessions
            .write()
            .await
            .insert(token, Session { claims, expires_at });
        token
    }

    /// 解析会话；过期会话顺带清除
    pub async fn resolve_session(&self, token: &Uuid) -> Option<Claims> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Some(session.claims.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn drop_session(&self, token: &Uuid) {
        self.sessions.write().await.remove(token);
    }
}

/// 从请求头解析会话cookie
pub fn session_token(headers: &HeaderMap) -> Option<Uuid> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(SESSION_COOKIE) {
            return parts.next().and_then(|v| Uuid::parse_str(v).ok());
        }
    }
    None
}

fn session_cookie(token: &Uuid, ttl_hours: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl_hours.max(0) * 3600
    )
}

fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

// ========== 认证路由 ==========

/// GET /api/auth/login - 重定向到提供方授权端点
pub async fn login(State(state): State<AppState>) -> impl IntoResponse {
    let login_state = state.auth.issue_state().await;
    Redirect::temporary(&state.auth.authorize_url(&login_state))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// GET /api/auth/callback - 授权码回调
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    if !state.auth.take_state(&params.state).await {
        warn!("Auth callback with unknown or expired state");
        return Err(ApiError(CaselogError::Unauthorized(
            "Invalid login state".to_string(),
        )));
    }

    let info = state.auth.exchange_code(&params.code).await?;

    // 用户表与身份提供方惰性同步
    let user = state
        .storage
        .upsert_user(&UpsertUser {
            id: info.sub.clone(),
            email: info.email.clone(),
            first_name: info.given_name.clone(),
            last_name: info.family_name.clone(),
            profile_image_url: info.picture.clone(),
        })
        .await?;
    info!("User authenticated: {}", user.id);

    let claims = Claims {
        sub: info.sub,
        email: info.email,
        first_name: info.given_name,
        last_name: info.family_name,
    };
    let token = state.auth.create_session(claims).await;
    let cookie = session_cookie(&token, state.config.auth.session_ttl_hours);

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::temporary("/"),
    )
        .into_response())
}

/// GET /api/callback - 回调URL旧配置的兼容重定向
pub async fn legacy_callback(request: Request) -> impl IntoResponse {
    let target = match request.uri().query() {
        Some(query) => format!("/api/auth/callback?{}", query),
        None => "/api/auth/callback".to_string(),
    };
    Redirect::permanent(&target)
}

/// GET /api/auth/logout - 销毁会话并跳转提供方登出
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = session_token(&headers) {
        state.auth.drop_session(&token).await;
    }
    let logout_url = format!(
        "{}/logout?client_id={}&post_logout_redirect_uri={}",
        state.config.auth.issuer_url, state.config.auth.client_id, state.config.server.base_url
    );
    (
        AppendHeaders([(header::SET_COOKIE, clear_session_cookie())]),
        Redirect::temporary(&logout_url),
    )
}

// ========== 认证中间件与管理员判定 ==========

/// 会话校验中间件：失败即401，成功把Claims注入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = session_token(request.headers()).ok_or_else(|| {
        ApiError(CaselogError::Unauthorized("Not authenticated".to_string()))
    })?;

    let claims = state.auth.resolve_session(&token).await.ok_or_else(|| {
        ApiError(CaselogError::Unauthorized(
            "Session expired".to_string(),
        ))
    })?;

    // 每请求惰性upsert，保证用户记录存在且基础字段跟随提供方
    state
        .storage
        .upsert_user(&UpsertUser {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            first_name: claims.first_name.clone(),
            last_name: claims.last_name.clone(),
            profile_image_url: None,
        })
        .await?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// 管理员门禁：每请求读库判定，不缓存角色
pub async fn require_admin(storage: &dyn Storage, claims: &Claims) -> Result<User> {
    let user = storage
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| CaselogError::Forbidden("Admin access required".to_string()))?;
    if user.role != UserRole::Admin || !user.is_active {
        return Err(CaselogError::Forbidden("Admin access required".to_string()));
    }
    Ok(user)
}

// ========== 当前用户 ==========

/// GET /api/auth/user
pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<User>> {
    let user = state
        .storage
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| CaselogError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub institution: Option<String>,
    pub profile_image_url: Option<String>,
}

/// PATCH /api/auth/user - 自助档案更新
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let update = UpdateUser {
        first_name: body.first_name,
        last_name: body.last_name,
        specialty: body.specialty,
        license_number: body.license_number,
        institution: body.institution,
        profile_image_url: body.profile_image_url,
    };
    let user = state
        .storage
        .update_user(&claims.sub, &update)
        .await?
        .ok_or_else(|| CaselogError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct ThemeRequest {
    pub theme: String,
}

/// PATCH /api/auth/theme - 主题偏好，只接受light/dark
pub async fn update_theme(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<ThemeRequest>,
) -> ApiResult<Json<User>> {
    if !is_valid_theme(&body.theme) {
        return Err(ApiError(CaselogError::invalid_field(
            "theme",
            "theme must be \"light\" or \"dark\"",
        )));
    }
    let user = state
        .storage
        .update_theme(&claims.sub, &body.theme)
        .await?
        .ok_or_else(|| CaselogError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use caselog_database::{AdminUserUpdate, MemoryStorage};

    fn test_config(ttl_hours: i64) -> Arc<AppConfig> {
        let mut config = AppConfig::load(None).expect("default config");
        config.auth.session_ttl_hours = ttl_hours;
        Arc::new(config)
    }

    fn claims() -> Claims {
        Claims {
            sub: "sub-1".to_string(),
            email: Some("doc@example.org".to_string()),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn session_roundtrip() {
        let auth = AuthService::new(test_config(24));
        let token = auth.create_session(claims()).await;
        let resolved = auth.resolve_session(&token).await.unwrap();
        assert_eq!(resolved.sub, "sub-1");

        auth.drop_session(&token).await;
        assert!(auth.resolve_session(&token).await.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_rejected_and_purged() {
        let auth = AuthService::new(test_config(-1));
        let token = auth.create_session(claims()).await;
        assert!(auth.resolve_session(&token).await.is_none());
        // 再次查询仍为None（已清除）
        assert!(auth.resolve_session(&token).await.is_none());
    }

    #[tokio::test]
    async fn login_state_is_single_use() {
        let auth = AuthService::new(test_config(24));
        let state = auth.issue_state().await;
        assert!(auth.take_state(&state).await);
        assert!(!auth.take_state(&state).await);
        assert!(!auth.take_state("never-issued").await);
    }

    #[test]
    fn session_cookie_parsing() {
        let token = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; caselog_session={}; x=y", token)).unwrap(),
        );
        assert_eq!(session_token(&headers), Some(token));

        let mut missing = HeaderMap::new();
        missing.insert(header::COOKIE, HeaderValue::from_static("other=1"));
        assert_eq!(session_token(&missing), None);

        let mut garbage = HeaderMap::new();
        garbage.insert(
            header::COOKIE,
            HeaderValue::from_static("caselog_session=not-a-uuid"),
        );
        assert_eq!(session_token(&garbage), None);
    }

    #[tokio::test]
    async fn admin_gate_requires_active_admin_role() {
        let storage = MemoryStorage::new();
        storage
            .upsert_user(&UpsertUser {
                id: "sub-1".to_string(),
                email: Some("doc@example.org".to_string()),
                first_name: None,
                last_name: None,
                profile_image_url: None,
            })
            .await
            .unwrap();
        let claims = claims();

        // 默认角色为user
        let err = require_admin(&storage, &claims).await.unwrap_err();
        assert!(matches!(err, CaselogError::Forbidden(_)));

        storage
            .admin_update_user(
                "sub-1",
                &AdminUserUpdate {
                    role: Some(UserRole::Admin),
                    is_active: None,
                },
            )
            .await
            .unwrap();
        assert!(require_admin(&storage, &claims).await.is_ok());

        // 停用的管理员同样拒绝
        storage
            .admin_update_user(
                "sub-1",
                &AdminUserUpdate {
                    role: None,
                    is_active: Some(false),
                },
            )
            .await
            .unwrap();
        let err = require_admin(&storage, &claims).await.unwrap_err();
        assert!(matches!(err, CaselogError::Forbidden(_)));
    }

    #[tokio::test]
    async fn admin_gate_rejects_unknown_subject() {
        let storage = MemoryStorage::new();
        let err = require_admin(&storage, &claims()).await.unwrap_err();
        assert!(matches!(err, CaselogError::Forbidden(_)));
    }

    #[test]
    fn authorize_url_carries_state_and_client() {
        let auth = AuthService::new(test_config(24));
        let url = auth.authorize_url("abc123");
        assert!(url.contains("state=abc123"));
        assert!(url.contains("response_type=code"));
    }
}
