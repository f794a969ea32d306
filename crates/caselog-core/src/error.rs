//! 错误定义模块

use serde::Serialize;
use thiserror::Error;

/// 字段级校验错误
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Caselog系统统一错误类型
#[derive(Error, Debug)]
pub enum CaselogError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("校验错误: {0}")]
    Validation(String),

    #[error("请求字段校验失败")]
    Invalid(Vec<FieldError>),

    #[error("未认证: {0}")]
    Unauthorized(String),

    #[error("权限不足: {0}")]
    Forbidden(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("文件上传错误: {0}")]
    Upload(String),

    #[error("身份提供方错误: {0}")]
    IdentityProvider(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl CaselogError {
    /// 由单个字段问题构造校验错误
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        CaselogError::Invalid(vec![FieldError::new(field, message)])
    }
}

/// Caselog系统统一结果类型
pub type Result<T> = std::result::Result<T, CaselogError>;
