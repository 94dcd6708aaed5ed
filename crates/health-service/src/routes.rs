//! 健康检查路由
//!
//! `/health` 为存活探针，进程活着即返回 ok；`/ready` 为就绪探针，
//! 每次请求从连接池开启一次性工作单元执行组合健康检查。就绪探针
//! 失败时编排系统会将实例从流量中摘除。

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::PgPool;

use stratum_object_storage::ObjectStore;
use stratum_repository::{CommonRepository, PgSession, RepositoryError};

use crate::error::ServiceHealthError;
use crate::service::{HealthReport, HealthService, HealthStatus};

/// 健康路由状态，由组合根注入
#[derive(Clone)]
pub struct HealthState {
    pub service_name: String,
    pub pool: PgPool,
    pub object_storage: Option<Arc<dyn ObjectStore>>,
}

/// 构建健康检查路由
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.service_name
    }))
}

/// 就绪探针：检查数据库和对象存储连接是否可用
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    let report = match probe(&state).await {
        Ok(report) => report,
        // 连开工作单元都失败，同样归结为数据库不可用
        Err(err) => {
            HealthReport::unhealthy(&ServiceHealthError::database_connection(err.to_string()))
        }
    };

    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

async fn probe(state: &HealthState) -> Result<HealthReport, RepositoryError> {
    let session = PgSession::begin(&state.pool).await?;
    let mut service = HealthService::new(Box::new(CommonRepository::new(session)));
    if let Some(store) = &state.object_storage {
        service = service.with_object_storage(store.clone());
    }
    Ok(service.check().await)
}
