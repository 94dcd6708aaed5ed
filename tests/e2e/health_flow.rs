//! 健康检查组合场景

use std::sync::Arc;

use stratum_health_service::{HealthService, HealthStatus};
use stratum_object_storage::test_utils::MemoryObjectStore;
use stratum_object_storage::ObjectStore;
use stratum_repository::test_utils::MemorySession;
use stratum_repository::CommonRepository;

fn db_probe() -> Box<CommonRepository<MemorySession>> {
    Box::new(CommonRepository::new(MemorySession::new()))
}

#[tokio::test]
async fn test_all_subsystems_healthy() {
    let store = Arc::new(MemoryObjectStore::new());
    store
        .upload_file("probe/sentinel", b"ok".to_vec())
        .await
        .unwrap();

    let mut service = HealthService::new(db_probe()).with_object_storage(store);
    let report = service.check().await;

    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.failing_subsystem.is_none());
}

#[tokio::test]
async fn test_storage_failure_is_named_in_verdict() {
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_all();

    // 数据库探活正常、对象存储失败 -> Unhealthy("object-storage")
    let mut service = HealthService::new(db_probe()).with_object_storage(store.clone());
    let report = service.check().await;

    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.failing_subsystem.as_deref(), Some("object-storage"));

    // 存储恢复后裁决回到健康
    store.recover();
    let report = service.check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
}
