//! 测试工具模块
//!
//! 提供无外部依赖的内存工作单元和示例实体/DTO 对，用于本仓库各层的
//! 单元测试、集成测试与端到端测试。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RepositoryError, RepositoryResult};
use crate::mapping::{unknown_field, Entity, EntityMapping, FieldMap, INSTANCE_STATE_FIELD};
use crate::session::{
    ExecuteOutcome, Session, StagedInsert, StagedUpdate, StagedWrite, Statement,
};

// ==================== 内存工作单元 ====================

/// 可注入故障的会话操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Flush,
    Commit,
    Rollback,
    Refresh,
    Execute,
}

/// 注入故障的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 一般错误（语句错误、约束冲突等的替身）
    Internal,
    /// 连接级中断（探活应收窄为 false 的类别）
    Connection,
}

/// 内存工作单元
///
/// 以两份表快照模拟事务语义：`tables` 是当前事务视图，`committed`
/// 是最近一次提交的快照；rollback 将视图恢复到提交快照。主键列
/// 约定名为 `id`，插入时缺失则按自增序列生成。
#[derive(Debug, Default)]
pub struct MemorySession {
    tables: HashMap<String, Vec<FieldMap>>,
    committed: HashMap<String, Vec<FieldMap>>,
    staged: Vec<StagedWrite>,
    next_id: i64,
    fault: Option<(SessionOp, FaultKind)>,
    pub flush_count: u32,
    pub commit_count: u32,
    pub rollback_count: u32,
}

impl MemorySession {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// 预设下一次指定操作失败（一次性）
    pub fn fail_next(&mut self, op: SessionOp, kind: FaultKind) {
        self.fault = Some((op, kind));
    }

    /// 预置一行已提交数据
    pub fn seed_row(&mut self, table: &str, fields: FieldMap) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(fields.clone());
        self.committed
            .entry(table.to_string())
            .or_default()
            .push(fields);
    }

    /// 当前事务视图中的行
    pub fn rows(&self, table: &str) -> &[FieldMap] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 最近一次提交快照中的行
    pub fn committed_rows(&self, table: &str) -> &[FieldMap] {
        self.committed.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn take_fault(&mut self, op: SessionOp) -> Option<RepositoryError> {
        match self.fault {
            Some((fault_op, kind)) if fault_op == op => {
                self.fault = None;
                Some(match kind {
                    FaultKind::Internal => {
                        RepositoryError::Internal("injected failure".to_string())
                    }
                    FaultKind::Connection => {
                        RepositoryError::Connection("injected connection failure".to_string())
                    }
                })
            }
            _ => None,
        }
    }

    fn apply_staged(&mut self) -> RepositoryResult<Vec<FieldMap>> {
        let staged = std::mem::take(&mut self.staged);
        let mut flushed = Vec::with_capacity(staged.len());
        for write in staged {
            match write {
                StagedWrite::Insert(insert) => flushed.push(self.apply_insert(insert)),
                StagedWrite::Update(update) => flushed.push(self.apply_update(update)?),
            }
        }
        Ok(flushed)
    }

    fn apply_insert(&mut self, insert: StagedInsert) -> FieldMap {
        let mut fields: FieldMap = insert
            .fields
            .into_iter()
            .filter(|(name, value)| name.as_str() != INSTANCE_STATE_FIELD && !value.is_null())
            .collect();
        if !fields.contains_key("id") {
            fields.insert("id".to_string(), json!(self.next_id));
            self.next_id += 1;
        }
        self.tables
            .entry(insert.table)
            .or_default()
            .push(fields.clone());
        fields
    }

    fn apply_update(&mut self, update: StagedUpdate) -> RepositoryResult<FieldMap> {
        let rows = self.tables.entry(update.table.clone()).or_default();
        let row = rows
            .iter_mut()
            .find(|row| row.get(&update.key_field) == Some(&update.key))
            .ok_or_else(|| RepositoryError::NotFound {
                table: update.table.clone(),
                key: update.key.to_string(),
            })?;
        for (field, value) in update.changes {
            if field == INSTANCE_STATE_FIELD || value.is_null() {
                continue;
            }
            row.insert(field, value);
        }
        Ok(row.clone())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn stage_insert(&mut self, insert: StagedInsert) {
        self.staged.push(StagedWrite::Insert(insert));
    }

    fn stage_update(&mut self, update: StagedUpdate) {
        self.staged.push(StagedWrite::Update(update));
    }

    async fn flush(&mut self) -> RepositoryResult<Vec<FieldMap>> {
        self.flush_count += 1;
        if let Some(err) = self.take_fault(SessionOp::Flush) {
            return Err(err);
        }
        self.apply_staged()
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if let Some(err) = self.take_fault(SessionOp::Commit) {
            return Err(err);
        }
        self.apply_staged()?;
        self.commit_count += 1;
        self.committed = self.tables.clone();
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        self.rollback_count += 1;
        if let Some(err) = self.take_fault(SessionOp::Rollback) {
            return Err(err);
        }
        self.staged.clear();
        self.tables = self.committed.clone();
        Ok(())
    }

    async fn refresh(
        &mut self,
        table: &str,
        key_field: &str,
        key: Value,
    ) -> RepositoryResult<FieldMap> {
        if let Some(err) = self.take_fault(SessionOp::Refresh) {
            return Err(err);
        }
        self.tables
            .get(table)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.get(key_field) == Some(&key))
                    .cloned()
            })
            .ok_or_else(|| RepositoryError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            })
    }

    async fn execute(&mut self, statement: Statement) -> RepositoryResult<ExecuteOutcome> {
        if let Some(err) = self.take_fault(SessionOp::Execute) {
            return Err(err);
        }
        if statement.sql.trim().eq_ignore_ascii_case("SELECT 1") {
            return Ok(ExecuteOutcome {
                rows_affected: 1,
                rows: vec![FieldMap::from([("?column?".to_string(), json!(1))])],
            });
        }
        Ok(ExecuteOutcome::default())
    }
}

// ==================== 示例实体/DTO 对 ====================

/// 示例行实体
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleEntity {
    pub id: i64,
    pub name: String,
    tainted: bool,
}

impl SampleEntity {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            tainted: false,
        }
    }

    /// 测试用：让 `to_fields` 附带内部状态标记，验证更新排除规则
    pub fn taint_instance_state(&mut self) {
        self.tainted = true;
    }
}

impl Entity for SampleEntity {
    fn table_name() -> &'static str {
        "sample_records"
    }

    fn primary_key_field() -> &'static str {
        "id"
    }

    fn primary_key(&self) -> Value {
        json!(self.id)
    }

    fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        // 主键 0 视为尚未分配，导出为未设置
        fields.insert(
            "id".to_string(),
            if self.id == 0 { Value::Null } else { json!(self.id) },
        );
        fields.insert("name".to_string(), json!(self.name));
        if self.tainted {
            fields.insert(INSTANCE_STATE_FIELD.to_string(), json!("transient"));
        }
        fields
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> RepositoryResult<()> {
        match field {
            "id" => {
                self.id = value.as_i64().ok_or_else(|| unknown_field(field))?;
            }
            "name" => {
                self.name = value
                    .as_str()
                    .ok_or_else(|| unknown_field(field))?
                    .to_string();
            }
            _ => return Err(unknown_field(field)),
        }
        Ok(())
    }
}

/// 示例 DTO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDto {
    pub id: i64,
    pub name: String,
}

impl SampleDto {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// 示例映射契约实现
pub struct SampleMapping;

impl EntityMapping for SampleMapping {
    type Entity = SampleEntity;
    type Dto = SampleDto;

    fn entity_to_dto(&self, entity: &SampleEntity) -> SampleDto {
        SampleDto::new(entity.id, &entity.name)
    }

    fn dto_to_entity(&self, dto: &SampleDto) -> SampleEntity {
        SampleEntity::new(dto.id, &dto.name)
    }
}
