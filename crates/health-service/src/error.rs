//! 健康检查错误类型定义
//!
//! 健康层的失败必须携带失败的子系统，不允许以笼统错误上抛。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// 数据库子系统名
pub const DATABASE_SUBSYSTEM: &str = "database";

/// 对象存储子系统名
pub const OBJECT_STORAGE_SUBSYSTEM: &str = "object-storage";

/// 健康检查错误类型
#[derive(Debug, Error)]
pub enum ServiceHealthError {
    /// 数据库连接不可用（探活返回 false 或连接级失败）
    #[error("数据库连接失败: {detail}")]
    DatabaseConnection { detail: String },

    /// 其他必需子系统探测失败
    #[error("子系统 {subsystem} 探测失败: {detail}")]
    Subsystem { subsystem: String, detail: String },
}

impl ServiceHealthError {
    pub fn database_connection(detail: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            detail: detail.into(),
        }
    }

    pub fn subsystem(subsystem: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Subsystem {
            subsystem: subsystem.into(),
            detail: detail.into(),
        }
    }

    /// 失败的子系统名
    pub fn failing_subsystem(&self) -> &str {
        match self {
            Self::DatabaseConnection { .. } => DATABASE_SUBSYSTEM,
            Self::Subsystem { subsystem, .. } => subsystem,
        }
    }

    /// 失败详情
    pub fn detail(&self) -> &str {
        match self {
            Self::DatabaseConnection { detail } => detail,
            Self::Subsystem { detail, .. } => detail,
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseConnection { .. } => "DATABASE_CONNECTION_ERROR",
            Self::Subsystem { .. } => "SUBSYSTEM_UNAVAILABLE",
        }
    }
}

impl IntoResponse for ServiceHealthError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code(),
            "failing_subsystem": self.failing_subsystem(),
            "detail": self.detail(),
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
