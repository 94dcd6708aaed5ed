//! 通用仓储基类
//!
//! 对一个具体的实体/DTO 对提供事务安全的增改查原语。每个仓储实例
//! 在构造时注入一个会话并在整个生命周期内独占持有；任何一步失败都
//! 会先回滚工作单元再上抛原始错误，保证不会留下可观测的部分写入。

use tracing::warn;

use crate::common::probe_connection;
use crate::error::RepositoryResult;
use crate::mapping::{exclusion_set, Entity, EntityMapping, FieldMap};
use crate::session::{ExecuteOutcome, Session, StagedInsert, StagedUpdate, Statement};

/// 通用仓储
///
/// `P` 提供实体与 DTO 的双向映射，`S` 是注入的工作单元。
pub struct BaseRepository<P: EntityMapping, S: Session> {
    session: S,
    mapping: P,
}

impl<P: EntityMapping, S: Session> BaseRepository<P, S> {
    /// 以注入的会话和映射构造仓储
    pub fn new(session: S, mapping: P) -> Self {
        Self { session, mapping }
    }

    /// 访问底层会话
    pub fn session(&self) -> &S {
        &self.session
    }

    /// 可变访问底层会话
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// 拆出底层会话（仓储随之结束生命周期）
    pub fn into_session(self) -> S {
        self.session
    }

    /// 失败路径上先回滚再上抛原始错误
    ///
    /// 回滚自身的失败只记录日志，不得掩盖原始错误。
    async fn rollback_on_error<T>(&mut self, result: RepositoryResult<T>) -> RepositoryResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(rollback_err) = self.session.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed operation also failed");
                }
                Err(err)
            }
        }
    }

    /// 新增一条记录
    ///
    /// 将 DTO 映射为实体并暂存插入，flush 以取得数据库生成的字段
    /// （自增主键、默认值列），返回据此回填后的 DTO。不提交事务。
    pub async fn add(&mut self, dto: &P::Dto) -> RepositoryResult<P::Dto> {
        let mut entity = self.mapping.dto_to_entity(dto);
        self.session.stage_insert(StagedInsert {
            table: P::Entity::table_name().to_string(),
            fields: entity.to_fields(),
        });

        let result = match self.session.flush().await {
            Ok(flushed) => match flushed.last() {
                Some(fields) => entity.apply_fields(fields),
                None => Ok(()),
            },
            Err(err) => Err(err),
        };
        self.rollback_on_error(result).await?;

        Ok(self.mapping.entity_to_dto(&entity))
    }

    /// 按字段计划更新一个已加载的实体
    ///
    /// 排除集为内部状态标记与 `ignore_fields` 的并集；计划中其余
    /// 字段逐个写到实体上并暂存更新，flush 后返回刷新的 DTO。
    /// 本调用不提交事务。
    pub async fn update(
        &mut self,
        entity: &mut P::Entity,
        dto: &P::Dto,
        ignore_fields: &[&str],
    ) -> RepositoryResult<P::Dto> {
        let excluded = exclusion_set(ignore_fields.iter().copied());
        let plan = self.mapping.dto_to_entity(dto).to_fields();
        // 更新按实体当前主键定位行，先于字段覆盖取值
        let key = entity.primary_key();

        let result = async {
            let mut changes = FieldMap::new();
            for (field, value) in &plan {
                if excluded.contains(field) || value.is_null() {
                    continue;
                }
                entity.apply_field(field, value)?;
                changes.insert(field.clone(), value.clone());
            }
            self.session.stage_update(StagedUpdate {
                table: P::Entity::table_name().to_string(),
                key_field: P::Entity::primary_key_field().to_string(),
                key,
                changes,
            });
            self.session.flush().await?;
            Ok(())
        }
        .await;
        self.rollback_on_error(result).await?;

        Ok(self.mapping.entity_to_dto(entity))
    }

    /// 提交当前工作单元内暂存的全部工作
    pub async fn commit(&mut self) -> RepositoryResult<()> {
        let result = self.session.commit().await;
        self.rollback_on_error(result).await
    }

    /// 将暂存的修改推送到存储但不结束事务
    pub async fn flush(&mut self) -> RepositoryResult<()> {
        let result = self.session.flush().await.map(|_| ());
        self.rollback_on_error(result).await
    }

    /// 以存储中的当前持久化状态覆盖实体，丢弃未提交的内存修改
    pub async fn refresh(&mut self, entity: &mut P::Entity) -> RepositoryResult<()> {
        let result = match self
            .session
            .refresh(
                P::Entity::table_name(),
                P::Entity::primary_key_field(),
                entity.primary_key(),
            )
            .await
        {
            Ok(fields) => entity.apply_fields(&fields),
            Err(err) => Err(err),
        };
        self.rollback_on_error(result).await
    }

    /// 执行任意调用方提供的语句
    pub async fn execute(&mut self, statement: Statement) -> RepositoryResult<ExecuteOutcome> {
        let result = self.session.execute(statement).await;
        self.rollback_on_error(result).await
    }

    /// 连接探活
    ///
    /// 对存储做一次最小往返：成功返回 true；连接级错误收窄为 false；
    /// 其余错误（如语句错误）属于编程错误，原样上抛。
    pub async fn is_connection_exist(&mut self) -> RepositoryResult<bool> {
        probe_connection(&mut self.session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::mapping::INSTANCE_STATE_FIELD;
    use crate::session::MockSession;
    use crate::test_utils::{SampleDto, SampleEntity, SampleMapping};
    use serde_json::json;

    fn repo(session: MockSession) -> BaseRepository<SampleMapping, MockSession> {
        BaseRepository::new(session, SampleMapping)
    }

    fn generated_row(id: i64, name: &str) -> FieldMap {
        FieldMap::from([
            ("id".to_string(), json!(id)),
            ("name".to_string(), json!(name)),
        ])
    }

    #[tokio::test]
    async fn test_add_stages_insert_and_flushes() {
        let mut session = MockSession::new();
        session
            .expect_stage_insert()
            .withf(|insert| {
                insert.table == "sample_records" && insert.fields["name"] == json!("alpha")
            })
            .times(1)
            .return_const(());
        session
            .expect_flush()
            .times(1)
            .returning(|| Ok(vec![generated_row(7, "alpha")]));

        let mut repo = repo(session);
        let dto = repo.add(&SampleDto::new(0, "alpha")).await.unwrap();

        // 数据库生成的主键回填到返回的 DTO
        assert_eq!(dto.id, 7);
        assert_eq!(dto.name, "alpha");
    }

    #[tokio::test]
    async fn test_add_rolls_back_on_flush_error() {
        let mut session = MockSession::new();
        session.expect_stage_insert().times(1).return_const(());
        session
            .expect_flush()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("flush failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let err = repo.add(&SampleDto::new(0, "alpha")).await.unwrap_err();

        // 原始错误原样上抛
        assert!(matches!(err, RepositoryError::Internal(_)));
    }

    #[tokio::test]
    async fn test_update_applies_plan_fields() {
        let mut session = MockSession::new();
        session
            .expect_stage_update()
            .withf(|update| {
                update.key == json!(1) && update.changes["name"] == json!("renamed")
            })
            .times(1)
            .return_const(());
        session.expect_flush().times(1).returning(|| Ok(vec![]));

        let mut repo = repo(session);
        let mut entity = SampleEntity::new(1, "old_name");
        let dto = repo
            .update(&mut entity, &SampleDto::new(1, "renamed"), &[])
            .await
            .unwrap();

        assert_eq!(dto.name, "renamed");
        assert_eq!(entity.name, "renamed");
        assert_eq!(entity.id, 1);
    }

    #[tokio::test]
    async fn test_update_honors_ignore_fields() {
        let mut session = MockSession::new();
        session
            .expect_stage_update()
            .withf(|update| !update.changes.contains_key("id"))
            .times(1)
            .return_const(());
        session.expect_flush().times(1).returning(|| Ok(vec![]));

        let mut repo = repo(session);
        let mut entity = SampleEntity::new(1, "old_name");
        // id 在排除集内，计划里的新值 2 不得落到实体上
        let dto = repo
            .update(&mut entity, &SampleDto::new(2, "new_name"), &["id"])
            .await
            .unwrap();

        assert_eq!(entity.id, 1);
        assert_eq!(dto.id, 1);
        assert_eq!(dto.name, "new_name");
    }

    #[tokio::test]
    async fn test_update_always_excludes_instance_state() {
        // 字段计划被污染也不得把内部状态标记写到实体上：
        // SampleEntity 对该字段返回映射错误，更新仍须成功。
        struct TaintedMapping;
        impl EntityMapping for TaintedMapping {
            type Entity = SampleEntity;
            type Dto = SampleDto;

            fn entity_to_dto(&self, entity: &SampleEntity) -> SampleDto {
                SampleDto::new(entity.id, &entity.name)
            }

            fn dto_to_entity(&self, dto: &SampleDto) -> SampleEntity {
                let mut entity = SampleEntity::new(dto.id, &dto.name);
                entity.taint_instance_state();
                entity
            }
        }

        let mut session = MockSession::new();
        session
            .expect_stage_update()
            .withf(|update| !update.changes.contains_key(INSTANCE_STATE_FIELD))
            .times(1)
            .return_const(());
        session.expect_flush().times(1).returning(|| Ok(vec![]));

        let mut repo = BaseRepository::new(session, TaintedMapping);
        let mut entity = SampleEntity::new(1, "old_name");
        let dto = repo
            .update(&mut entity, &SampleDto::new(1, "new_name"), &[])
            .await
            .unwrap();

        assert_eq!(dto.name, "new_name");
    }

    #[tokio::test]
    async fn test_update_rolls_back_on_flush_error() {
        let mut session = MockSession::new();
        session.expect_stage_update().times(1).return_const(());
        session
            .expect_flush()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("flush failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let mut entity = SampleEntity::new(1, "old_name");
        let err = repo
            .update(&mut entity, &SampleDto::new(1, "new_name"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Internal(_)));
    }

    #[tokio::test]
    async fn test_commit_delegates_to_session() {
        let mut session = MockSession::new();
        session.expect_commit().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        repo.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_rolls_back_on_error() {
        let mut session = MockSession::new();
        session
            .expect_commit()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("commit failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let err = repo.commit().await.unwrap_err();

        assert!(matches!(err, RepositoryError::Internal(_)));
    }

    #[tokio::test]
    async fn test_flush_rolls_back_on_error() {
        let mut session = MockSession::new();
        session
            .expect_flush()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("flush failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        assert!(repo.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_overwrites_entity() {
        let mut session = MockSession::new();
        session
            .expect_refresh()
            .withf(|table, key_field, key| {
                table == "sample_records" && key_field == "id" && *key == json!(1)
            })
            .times(1)
            .returning(|_, _, _| Ok(generated_row(1, "persisted")));

        let mut repo = repo(session);
        let mut entity = SampleEntity::new(1, "dirty_edit");
        repo.refresh(&mut entity).await.unwrap();

        // 未提交的内存修改被持久化状态覆盖
        assert_eq!(entity.name, "persisted");
    }

    #[tokio::test]
    async fn test_refresh_rolls_back_on_error() {
        let mut session = MockSession::new();
        session
            .expect_refresh()
            .times(1)
            .returning(|_, _, _| Err(RepositoryError::Internal("refresh failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let mut entity = SampleEntity::new(1, "x");
        assert!(repo.refresh(&mut entity).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_passes_statement_through() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .withf(|statement| statement.sql == "SELECT 1")
            .times(1)
            .returning(|_| Ok(ExecuteOutcome::default()));

        let mut repo = repo(session);
        repo.execute(Statement::new("SELECT 1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_rolls_back_on_error() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .times(1)
            .returning(|_| Err(RepositoryError::Internal("execute failed".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let err = repo.execute(Statement::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Internal(_)));
    }

    #[tokio::test]
    async fn test_rollback_failure_does_not_mask_original_error() {
        let mut session = MockSession::new();
        session
            .expect_commit()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("commit failed".to_string())));
        session
            .expect_rollback()
            .times(1)
            .returning(|| Err(RepositoryError::Internal("rollback failed".to_string())));

        let mut repo = repo(session);
        let err = repo.commit().await.unwrap_err();

        // 上抛的是 commit 的原始错误
        assert_eq!(err.to_string(), "内部错误: commit failed");
    }

    #[tokio::test]
    async fn test_is_connection_exist_true_on_success() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .withf(|statement| statement.sql == "SELECT 1")
            .times(1)
            .returning(|_| Ok(ExecuteOutcome::default()));

        let mut repo = repo(session);
        assert!(repo.is_connection_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_is_connection_exist_false_on_connection_error() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .times(1)
            .returning(|_| Err(RepositoryError::Connection("broken pipe".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        assert!(!repo.is_connection_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_is_connection_exist_reraises_other_errors() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .times(1)
            .returning(|_| Err(RepositoryError::Internal("syntax error".to_string())));
        session.expect_rollback().times(1).returning(|| Ok(()));

        let mut repo = repo(session);
        let err = repo.is_connection_exist().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Internal(_)));
    }
}
