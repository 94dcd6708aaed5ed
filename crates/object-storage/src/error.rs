//! 对象存储错误类型定义

use thiserror::Error;

/// 对象存储错误类型
///
/// 传输/认证失败统一归入 `Transport`，本层不做重试，由调用方决定。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("无效的对象键: {0}")]
    InvalidKey(String),

    #[error("空的上传内容: {key}")]
    EmptyBody { key: String },

    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("对象存储传输错误: {0}")]
    Transport(String),
}

/// 错误结果类型别名
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::EmptyBody { .. } => "EMPTY_BODY",
            Self::NotFound(_) => "OBJECT_NOT_FOUND",
            Self::Transport(_) => "STORAGE_TRANSPORT_ERROR",
        }
    }
}
