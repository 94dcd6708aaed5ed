//! 实体与 DTO 的映射契约
//!
//! 仓储对外暴露 DTO，对内操作行实体。每个具体仓储通过实现
//! `EntityMapping` 提供双向转换；更新时以字段计划（字段名到 JSON 值
//! 的有序映射）为中间表示，并按排除集跳过不可覆盖的字段。

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{RepositoryError, RepositoryResult};

/// 行字段快照：字段名到 JSON 值的有序映射
///
/// 约定：值为 `Null` 的字段视为"未设置"，插入时交由数据库填充
/// （自增主键、默认值列），更新时不参与覆盖。
pub type FieldMap = BTreeMap<String, Value>;

/// 会话内部状态标记字段
///
/// 属于工作单元的簿记信息而非行数据，任何更新都不得将其拷贝到实体上，
/// 无论调用方是否显式排除。
pub const INSTANCE_STATE_FIELD: &str = "_instance_state";

/// 构造更新排除集：内部状态标记 ∪ 调用方指定的字段
pub fn exclusion_set<'a, I>(ignore_fields: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut excluded: BTreeSet<String> = ignore_fields
        .into_iter()
        .map(|field| field.to_string())
        .collect();
    excluded.insert(INSTANCE_STATE_FIELD.to_string());
    excluded
}

/// 行实体：由工作单元持有的持久化对象
///
/// 实现方声明表名、主键，并提供字段级读写。`apply_field` 收到未知
/// 字段时必须返回映射错误而非静默跳过。
pub trait Entity: Send + Sync {
    /// 实体对应的表名
    fn table_name() -> &'static str;

    /// 主键字段名
    fn primary_key_field() -> &'static str;

    /// 当前主键值
    fn primary_key(&self) -> Value;

    /// 导出全部声明字段的当前内存状态
    fn to_fields(&self) -> FieldMap;

    /// 将单个字段写回实体
    fn apply_field(&mut self, field: &str, value: &Value) -> RepositoryResult<()>;

    /// 将一组字段写回实体（用于 flush/refresh 回填）
    fn apply_fields(&mut self, fields: &FieldMap) -> RepositoryResult<()> {
        for (field, value) in fields {
            if field.as_str() == INSTANCE_STATE_FIELD {
                continue;
            }
            self.apply_field(field, value)?;
        }
        Ok(())
    }
}

/// 映射契约：每个具体仓储必须提供的双向转换
///
/// 两个方向都要求对良构输入是全函数；转换失败属于编程错误，
/// 不是可重试条件。
pub trait EntityMapping: Send + Sync {
    type Entity: Entity;
    type Dto: Send + Sync;

    /// 实体 -> DTO，只读取实体当前内存状态，不重新查库
    fn entity_to_dto(&self, entity: &Self::Entity) -> Self::Dto;

    /// DTO -> 实体；产出实体的 `to_fields()` 即更新用的字段计划
    fn dto_to_entity(&self, dto: &Self::Dto) -> Self::Entity;
}

/// 构造未知字段的映射错误
pub(crate) fn unknown_field(field: &str) -> RepositoryError {
    RepositoryError::Mapping {
        field: field.to_string(),
    }
}
