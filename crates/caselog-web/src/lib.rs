//! # Caselog Web模块
//!
//! HTTP API层：认证网关（OIDC+会话）、路由处理器、照片上传与导出边界。

pub mod admin;
pub mod auth;
pub mod error;
pub mod export;
pub mod handlers;
pub mod server;
pub mod uploads;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, WebServer};
