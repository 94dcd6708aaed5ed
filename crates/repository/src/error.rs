//! 仓储层错误类型定义
//!
//! 区分连接级中断与其他数据库错误：连接级错误可被连接探活收窄为
//! 布尔值，其余错误一律在回滚后原样上抛。

use thiserror::Error;

/// 仓储层错误类型
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// 连接级中断（网络断开、TLS 失败、协议错误、连接池已关闭）
    #[error("数据库连接中断: {0}")]
    Connection(String),

    /// 其他数据库错误（约束冲突、语法错误、超时等）
    #[error("数据库错误: {0}")]
    Database(sqlx::Error),

    /// 映射契约被破坏（未知字段、类型不匹配），属于编程错误
    #[error("映射契约被破坏: 字段 {field}")]
    Mapping { field: String },

    #[error("记录未找到: {table} {key}")]
    NotFound { table: String, key: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Mapping { .. } => "MAPPING_CONTRACT_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为连接级中断
    ///
    /// 只有该类错误会被连接探活收窄为 false，其余错误原样上抛。
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // 连接级中断。PoolTimedOut 属于资源等待超时而非连接断开，
            // 不在收窄范围内。
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed => Self::Connection(err.to_string()),
            _ => Self::Database(err),
        }
    }
}
