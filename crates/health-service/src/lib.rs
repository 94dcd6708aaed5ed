//! 健康检查服务
//!
//! 聚合数据库连接探活与对象存储探测，产出携带失败子系统的结构化
//! 健康裁决，并提供存活/就绪 HTTP 探针。

pub mod error;
pub mod routes;
pub mod service;

pub use error::{ServiceHealthError, DATABASE_SUBSYSTEM, OBJECT_STORAGE_SUBSYSTEM};
pub use routes::{router, HealthState};
pub use service::{HealthReport, HealthService, HealthStatus};
