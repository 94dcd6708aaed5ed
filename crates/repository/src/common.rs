//! 连接探活仓储
//!
//! `CommonRepository` 不绑定任何实体/DTO 对，只向上层暴露连接探活，
//! 使健康检查无需依赖具体的业务表结构。

use async_trait::async_trait;
use tracing::warn;

use crate::base::BaseRepository;
use crate::error::RepositoryResult;
use crate::mapping::EntityMapping;
use crate::session::{Session, Statement};

/// 探活用的最小往返语句
const CONNECTION_PROBE_SQL: &str = "SELECT 1";

/// 连接探活：对存储做一次最小往返
///
/// 成功返回 true；连接级错误回滚后收窄为 false；其余错误回滚后
/// 原样上抛（语句错误属于编程错误，不是连接信号）。
pub(crate) async fn probe_connection<S: Session>(session: &mut S) -> RepositoryResult<bool> {
    let err = match session.execute(Statement::new(CONNECTION_PROBE_SQL)).await {
        Ok(_) => return Ok(true),
        Err(err) => err,
    };
    if let Err(rollback_err) = session.rollback().await {
        warn!(error = %rollback_err, "rollback after failed connection probe also failed");
    }
    if err.is_connection_error() {
        Ok(false)
    } else {
        Err(err)
    }
}

/// 连接探活能力，健康层依赖该抽象而非具体仓储
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connection_exist(&mut self) -> RepositoryResult<bool>;
}

/// 无实体仓储，仅用于探测存储连通性
pub struct CommonRepository<S: Session> {
    session: S,
}

impl<S: Session> CommonRepository<S> {
    /// 以注入的会话构造探活仓储
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// 访问底层会话
    pub fn session(&self) -> &S {
        &self.session
    }

    /// 连接探活
    pub async fn is_connection_exist(&mut self) -> RepositoryResult<bool> {
        probe_connection(&mut self.session).await
    }
}

#[async_trait]
impl<S: Session + Sync> ConnectivityProbe for CommonRepository<S> {
    async fn is_connection_exist(&mut self) -> RepositoryResult<bool> {
        CommonRepository::is_connection_exist(self).await
    }
}

#[async_trait]
impl<P, S> ConnectivityProbe for BaseRepository<P, S>
where
    P: EntityMapping,
    S: Session + Sync,
{
    async fn is_connection_exist(&mut self) -> RepositoryResult<bool> {
        BaseRepository::is_connection_exist(self).await
    }
}
