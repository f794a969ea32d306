//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use caselog_admin::AppConfig;
use caselog_core::{CaselogError, Result};
use caselog_database::Storage;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{self, auth_middleware, AuthService};
use crate::{admin, export, handlers, uploads};

/// 全部处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub auth: AuthService,
    pub config: Arc<AppConfig>,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(storage: Arc<dyn Storage>, config: Arc<AppConfig>) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse::<SocketAddr>()
            .map_err(|e| CaselogError::Config(format!("无效的监听地址: {}", e)))?;

        let state = AppState {
            storage,
            auth: AuthService::new(config.clone()),
            config,
        };
        let app = Self::create_app(state);
        Ok(Self { addr, app })
    }

    fn create_app(state: AppState) -> Router {
        // 上传走multipart，正文上限按配置加少量表单开销
        let body_limit = state.config.uploads.max_size_bytes + 64 * 1024;

        Router::new()
            // 认证路由（无需会话）
            .route("/health", get(handlers::health))
            .route("/api/auth/login", get(auth::login))
            .route("/api/auth/callback", get(auth::callback))
            .route("/api/callback", get(auth::legacy_callback))
            .route("/api/auth/logout", get(auth::logout))
            .route("/api/setup", post(handlers::setup))
            // 上传文件按文件名公开读取
            .route("/api/uploads/:filename", get(uploads::serve_upload))
            // 需要会话的路由
            .merge(protected_routes(state.clone()))
            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(state)
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| CaselogError::Internal(format!("Web server failed: {}", e)))?;

        Ok(())
    }
}

/// 会话中间件之后的业务路由
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // 当前用户
        .route(
            "/api/auth/user",
            get(auth::current_user).patch(auth::update_profile),
        )
        .route("/api/auth/theme", patch(auth::update_theme))
        // 患者
        .route(
            "/api/patients",
            get(handlers::list_patients).post(handlers::create_patient),
        )
        .route(
            "/api/patients/:id",
            get(handlers::get_patient)
                .patch(handlers::update_patient)
                .delete(handlers::delete_patient),
        )
        // 外科医生
        .route(
            "/api/surgeons",
            get(handlers::list_surgeons).post(handlers::create_surgeon),
        )
        .route(
            "/api/surgeons/:id",
            patch(handlers::update_surgeon).delete(handlers::delete_surgeon),
        )
        // 手术目录
        .route(
            "/api/procedures",
            get(handlers::list_procedures).post(handlers::create_procedure),
        )
        // 病例（静态段先于:id注册）
        .route("/api/cases/stats", get(handlers::case_stats))
        .route("/api/cases/export", get(export::export_cases))
        .route(
            "/api/cases",
            get(handlers::list_cases).post(handlers::create_case),
        )
        .route(
            "/api/cases/:id",
            get(handlers::get_case)
                .patch(handlers::update_case)
                .delete(handlers::delete_case),
        )
        .route("/api/cases/:id/complete", patch(handlers::complete_case))
        .route(
            "/api/cases/:id/photos",
            get(uploads::list_case_photos).post(uploads::upload_case_photo),
        )
        .route("/api/photos/:id", delete(uploads::delete_photo))
        // 病例模板
        .route(
            "/api/case-templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route("/api/case-templates/:id", delete(handlers::delete_template))
        // 用户偏好
        .route(
            "/api/user-preferences",
            get(handlers::get_preferences).put(handlers::put_preferences),
        )
        // 管理端
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/:user_id",
            get(admin::get_user).patch(admin::update_user),
        )
        .route("/api/admin/user-cases/:user_id", get(admin::user_cases))
        .route("/api/admin/stats/users", get(admin::user_stats))
        .route("/api/admin/stats/system", get(admin::system_stats))
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}
