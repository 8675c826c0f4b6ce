//! 错误定义模块

use thiserror::Error;

/// 诊断报告子系统统一错误类型
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("操作不被允许: {0}")]
    NotAllowed(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl ReportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReportError::NotFound(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ReportError {
    fn from(err: sqlx::Error) -> Self {
        ReportError::Database(err.to_string())
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, ReportError>;
