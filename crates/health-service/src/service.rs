//! 健康检查服务
//!
//! 将数据库连接探活与对象存储探测聚合为单一存活裁决。数据库探针
//! 通过 `ConnectivityProbe` 抽象注入（通常是一次性工作单元上的
//! `CommonRepository`），对象存储客户端为进程级资源，由组合根注入。

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use stratum_object_storage::ObjectStore;
use stratum_repository::ConnectivityProbe;

use crate::error::{ServiceHealthError, OBJECT_STORAGE_SUBSYSTEM};

/// 服务健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// 组合健康裁决
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub failing_subsystem: Option<String>,
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            failing_subsystem: None,
            detail: None,
        }
    }

    pub fn unhealthy(err: &ServiceHealthError) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            failing_subsystem: Some(err.failing_subsystem().to_string()),
            detail: Some(err.detail().to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// 健康检查服务
pub struct HealthService {
    db_probe: Box<dyn ConnectivityProbe>,
    object_storage: Option<Arc<dyn ObjectStore>>,
}

impl HealthService {
    /// 以注入的数据库探针构造服务
    pub fn new(db_probe: Box<dyn ConnectivityProbe>) -> Self {
        Self {
            db_probe,
            object_storage: None,
        }
    }

    /// 注入对象存储探测（注入后即为必需子系统）
    pub fn with_object_storage(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_storage = Some(store);
        self
    }

    /// 检查数据库连接
    ///
    /// 探活返回 false 或连接级失败都归结为数据库连接错误。
    pub async fn check_db_connection(&mut self) -> Result<(), ServiceHealthError> {
        match self.db_probe.is_connection_exist().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceHealthError::database_connection("连接探活失败")),
            Err(err) => Err(ServiceHealthError::database_connection(err.to_string())),
        }
    }

    /// 检查对象存储（未注入时视为通过）
    pub async fn check_object_storage(&self) -> Result<(), ServiceHealthError> {
        match &self.object_storage {
            None => Ok(()),
            Some(store) => store.health_check().await.map_err(|err| {
                ServiceHealthError::subsystem(OBJECT_STORAGE_SUBSYSTEM, err.to_string())
            }),
        }
    }

    /// 组合健康裁决：任一必需子系统失败即为 Unhealthy
    pub async fn check(&mut self) -> HealthReport {
        if let Err(err) = self.check_db_connection().await {
            warn!(subsystem = err.failing_subsystem(), detail = err.detail(), "health probe failed");
            return HealthReport::unhealthy(&err);
        }
        if let Err(err) = self.check_object_storage().await {
            warn!(subsystem = err.failing_subsystem(), detail = err.detail(), "health probe failed");
            return HealthReport::unhealthy(&err);
        }
        HealthReport::healthy()
    }
}
