//! 配置管理
//!
//! 配置来源分层：内置默认值 < 配置文件(TOML) < `CASELOG_`前缀环境变量。

use caselog_core::{CaselogError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Caselog系统完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 身份提供方配置
    pub auth: AuthConfig,
    /// 上传配置
    pub uploads: UploadConfig,
    /// 初始化配置
    pub setup: SetupConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 对外基础URL（OIDC回调重定向用）
    pub base_url: String,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 连接字符串；缺省时退回内存存储（仅开发用）
    pub url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
}

/// OIDC身份提供方配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 提供方域名，形如 https://idp.example.org
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// 会话有效期（小时）
    pub session_ttl_hours: i64,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 落盘目录
    pub dir: String,
    /// 单文件大小上限（字节）
    pub max_size_bytes: usize,
}

/// 初始化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// /api/setup 的共享口令
    pub secret: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// 加载配置；`path`为None时只用默认值与环境变量
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("server.port", 5000)
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("server.base_url", "http://localhost:5000")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("database.max_connections", 10)
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("auth.issuer_url", "")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("auth.client_id", "")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("auth.client_secret", "")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("auth.session_ttl_hours", 24)
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("uploads.dir", "uploads")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("uploads.max_size_bytes", 10 * 1024 * 1024)
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("setup.secret", "anesthesia-setup-2024")
            .map_err(|e| CaselogError::Config(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| CaselogError::Config(e.to_string()))?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("CASELOG").separator("__"));

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CaselogError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.uploads.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.database.url.is_none());
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert_eq!(config.logging.level, "info");
    }
}
