//! 仓储全链路场景

use stratum_repository::test_utils::{
    FaultKind, MemorySession, SampleDto, SampleEntity, SampleMapping, SessionOp,
};
use stratum_repository::{BaseRepository, Entity, RepositoryError};

#[tokio::test]
async fn test_full_repository_scenario() {
    let mut repo = BaseRepository::new(MemorySession::new(), SampleMapping);

    // 新增：返回的 DTO 带数据库生成的主键
    let added = repo.add(&SampleDto::new(0, "x")).await.unwrap();
    assert!(added.id > 0);
    assert_eq!(added.name, "x");

    let mut entity = SampleEntity::new(added.id, &added.name);

    // 排除 name 的更新不改变 name
    let updated = repo
        .update(&mut entity, &SampleDto::new(added.id, "y"), &["name"])
        .await
        .unwrap();
    assert_eq!(updated.name, "x");

    // 不带排除的更新生效
    let updated = repo
        .update(&mut entity, &SampleDto::new(added.id, "y"), &[])
        .await
        .unwrap();
    assert_eq!(updated.name, "y");

    // 提交并刷新：持久化投影与最后一次更新一致
    repo.commit().await.unwrap();
    let mut reloaded = SampleEntity::new(added.id, "stale");
    repo.refresh(&mut reloaded).await.unwrap();
    assert_eq!(reloaded.name, "y");
}

#[tokio::test]
async fn test_commit_failure_leaves_clean_session() {
    let mut repo = BaseRepository::new(MemorySession::new(), SampleMapping);
    repo.add(&SampleDto::new(0, "doomed")).await.unwrap();

    repo.session_mut()
        .fail_next(SessionOp::Commit, FaultKind::Internal);
    let err = repo.commit().await.unwrap_err();
    assert!(matches!(err, RepositoryError::Internal(_)));

    // 回滚后：探活成功、无部分写入
    assert!(repo.is_connection_exist().await.unwrap());
    assert!(repo
        .session()
        .committed_rows(SampleEntity::table_name())
        .is_empty());
}

#[tokio::test]
async fn test_probe_distinguishes_error_classes() {
    let mut repo = BaseRepository::new(MemorySession::new(), SampleMapping);

    // 连接级错误 -> false
    repo.session_mut()
        .fail_next(SessionOp::Execute, FaultKind::Connection);
    assert!(!repo.is_connection_exist().await.unwrap());

    // 语句级错误 -> 原样上抛
    repo.session_mut()
        .fail_next(SessionOp::Execute, FaultKind::Internal);
    assert!(repo.is_connection_exist().await.is_err());

    // 无故障 -> true
    assert!(repo.is_connection_exist().await.unwrap());
}
