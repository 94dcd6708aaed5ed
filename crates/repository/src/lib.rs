//! 通用事务仓储层
//!
//! 以工作单元为边界，对任意实体/DTO 对提供事务安全的数据访问原语：
//! 暂存、部分字段更新（带排除规则）、提交、flush、refresh、任意查询，
//! 所有失败路径先回滚再上抛。连接探活由 `CommonRepository` 暴露给
//! 健康检查层。

pub mod base;
pub mod common;
pub mod error;
pub mod mapping;
pub mod session;
pub mod test_utils;

pub use base::BaseRepository;
pub use common::{CommonRepository, ConnectivityProbe};
pub use error::{RepositoryError, RepositoryResult};
pub use mapping::{exclusion_set, Entity, EntityMapping, FieldMap, INSTANCE_STATE_FIELD};
pub use session::{
    ExecuteOutcome, PgSession, Session, StagedInsert, StagedUpdate, StagedWrite, Statement,
};
