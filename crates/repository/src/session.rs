//! 工作单元（会话）抽象
//!
//! `Session` 是单个逻辑事务的作用域句柄：写操作先暂存，flush 时才
//! 产生 I/O，commit 最终落库，rollback 丢弃未提交的全部效果。仓储在
//! 构造时注入一个会话并独占持有，会话本身即互斥单元。
//!
//! `PgSession` 基于 sqlx 事务实现该契约，负责 JSON 字段值与
//! PostgreSQL 类型之间的动态转换。

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, PgPool, Postgres, Row, Transaction, TypeInfo};

use crate::error::{RepositoryError, RepositoryResult};
use crate::mapping::{FieldMap, INSTANCE_STATE_FIELD};

/// 待执行 SQL 语句与绑定参数
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    /// 追加一个绑定参数
    pub fn bind(mut self, value: Value) -> Self {
        self.binds.push(value);
        self
    }
}

/// execute 的执行结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    pub rows: Vec<FieldMap>,
}

/// 暂存的插入
#[derive(Debug, Clone, PartialEq)]
pub struct StagedInsert {
    pub table: String,
    pub fields: FieldMap,
}

/// 暂存的按主键字段更新
#[derive(Debug, Clone, PartialEq)]
pub struct StagedUpdate {
    pub table: String,
    pub key_field: String,
    pub key: Value,
    pub changes: FieldMap,
}

/// 暂存的写操作，flush 按暂存顺序执行
#[derive(Debug, Clone, PartialEq)]
pub enum StagedWrite {
    Insert(StagedInsert),
    Update(StagedUpdate),
}

/// 工作单元契约
///
/// 同一会话上顺序发起的操作按发起顺序生效；不同会话之间无顺序保证。
/// 会话被仓储独占持有，本身即互斥单元，因此只要求 `Send`。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send {
    /// 暂存一条插入，不产生 I/O
    fn stage_insert(&mut self, insert: StagedInsert);

    /// 暂存一条按主键的字段更新，不产生 I/O
    fn stage_update(&mut self, update: StagedUpdate);

    /// 将暂存的写操作推送到存储（不结束事务）
    ///
    /// 返回每条写操作落库后的完整行快照（含数据库生成的字段），
    /// 顺序与暂存顺序一致。
    async fn flush(&mut self) -> RepositoryResult<Vec<FieldMap>>;

    /// 提交事务；隐含一次 flush
    async fn commit(&mut self) -> RepositoryResult<()>;

    /// 回滚事务，丢弃暂存与未提交的全部效果
    async fn rollback(&mut self) -> RepositoryResult<()>;

    /// 重新读取某行的当前持久化状态
    async fn refresh(
        &mut self,
        table: &str,
        key_field: &str,
        key: Value,
    ) -> RepositoryResult<FieldMap>;

    /// 执行任意调用方提供的语句
    async fn execute(&mut self, statement: Statement) -> RepositoryResult<ExecuteOutcome>;
}

// ==================== PostgreSQL 实现 ====================

/// 基于 sqlx 事务的工作单元
///
/// commit/rollback 结束当前事务后，下一次操作会惰性开启新事务，
/// 因此同一个会话可以承载连续多个工作单元。
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    staged: Vec<StagedWrite>,
}

impl PgSession {
    /// 从连接池开启一个新会话（立即开启事务）
    pub async fn begin(pool: &PgPool) -> RepositoryResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            pool: pool.clone(),
            tx: Some(tx),
            staged: Vec::new(),
        })
    }

    /// 获取当前事务，必要时惰性开启
    async fn transaction(
        &mut self,
    ) -> RepositoryResult<&mut Transaction<'static, Postgres>> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| RepositoryError::Internal("事务未初始化".to_string()))
    }

    async fn flush_staged(&mut self) -> RepositoryResult<Vec<FieldMap>> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }
        let staged = std::mem::take(&mut self.staged);
        let tx = self.transaction().await?;
        let mut flushed = Vec::with_capacity(staged.len());
        for write in &staged {
            let row = match write {
                StagedWrite::Insert(insert) => insert_row(&mut **tx, insert).await?,
                StagedWrite::Update(update) => update_row(&mut **tx, update).await?,
            };
            flushed.push(row);
        }
        Ok(flushed)
    }
}

#[async_trait]
impl Session for PgSession {
    fn stage_insert(&mut self, insert: StagedInsert) {
        self.staged.push(StagedWrite::Insert(insert));
    }

    fn stage_update(&mut self, update: StagedUpdate) {
        self.staged.push(StagedWrite::Update(update));
    }

    async fn flush(&mut self) -> RepositoryResult<Vec<FieldMap>> {
        self.flush_staged().await
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if !self.staged.is_empty() {
            self.flush_staged().await?;
        }
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        self.staged.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn refresh(
        &mut self,
        table: &str,
        key_field: &str,
        key: Value,
    ) -> RepositoryResult<FieldMap> {
        let tx = self.transaction().await?;
        let sql = format!("SELECT * FROM {} WHERE {} = $1", table, key_field);
        let query = bind_value(sqlx::query(&sql), &key);
        match query.fetch_optional(&mut **tx).await? {
            Some(row) => row_to_fields(&row),
            None => Err(RepositoryError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn execute(&mut self, statement: Statement) -> RepositoryResult<ExecuteOutcome> {
        let tx = self.transaction().await?;
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.binds {
            query = bind_value(query, value);
        }
        if statement_returns_rows(&statement.sql) {
            let rows = query.fetch_all(&mut **tx).await?;
            let rows = rows
                .iter()
                .map(row_to_fields)
                .collect::<RepositoryResult<Vec<_>>>()?;
            Ok(ExecuteOutcome {
                rows_affected: rows.len() as u64,
                rows,
            })
        } else {
            let result = query.execute(&mut **tx).await?;
            Ok(ExecuteOutcome {
                rows_affected: result.rows_affected(),
                rows: Vec::new(),
            })
        }
    }
}

// ==================== 动态 SQL 桥接 ====================

async fn insert_row(
    conn: &mut PgConnection,
    insert: &StagedInsert,
) -> RepositoryResult<FieldMap> {
    // 空值字段视为未设置，交由数据库填充（自增主键、默认值列）
    let columns: Vec<(&String, &Value)> = insert
        .fields
        .iter()
        .filter(|(name, value)| name.as_str() != INSTANCE_STATE_FIELD && !value.is_null())
        .collect();

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING *", insert.table)
    } else {
        let names = columns
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            insert.table, names, placeholders
        )
    };

    let mut query = sqlx::query(&sql);
    for (_, value) in &columns {
        query = bind_value(query, value);
    }
    let row = query.fetch_one(conn).await?;
    row_to_fields(&row)
}

async fn update_row(
    conn: &mut PgConnection,
    update: &StagedUpdate,
) -> RepositoryResult<FieldMap> {
    let changes: Vec<(&String, &Value)> = update
        .changes
        .iter()
        .filter(|(name, value)| name.as_str() != INSTANCE_STATE_FIELD && !value.is_null())
        .collect();

    // 无可写字段时不产生写 I/O，返回当前行快照
    if changes.is_empty() {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            update.table, update.key_field
        );
        let query = bind_value(sqlx::query(&sql), &update.key);
        return match query.fetch_optional(conn).await? {
            Some(row) => row_to_fields(&row),
            None => Err(RepositoryError::NotFound {
                table: update.table.clone(),
                key: update.key.to_string(),
            }),
        };
    }

    let assignments = changes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{} = ${}", name, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${} RETURNING *",
        update.table,
        assignments,
        update.key_field,
        changes.len() + 1
    );

    let mut query = sqlx::query(&sql);
    for (_, value) in &changes {
        query = bind_value(query, value);
    }
    query = bind_value(query, &update.key);
    match query.fetch_optional(conn).await? {
        Some(row) => row_to_fields(&row),
        None => Err(RepositoryError::NotFound {
            table: update.table.clone(),
            key: update.key.to_string(),
        }),
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        // 数组和对象按 JSONB 绑定
        other => query.bind(other.clone()),
    }
}

fn row_to_fields(row: &PgRow) -> RepositoryResult<FieldMap> {
    let mut fields = FieldMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())?;
        fields.insert(column.name().to_string(), value);
    }
    Ok(fields)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> RepositoryResult<Value> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(Value::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(Value::from)
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|v| Value::from(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|v| Value::from(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|v| Value::from(v.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|v| Value::from(v.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        other => {
            // 未覆盖的类型按文本读取，读不出来的列以 Null 占位
            match row.try_get::<Option<String>, _>(index) {
                Ok(text) => text.map(Value::from),
                Err(_) => {
                    tracing::debug!(column_type = other, "decoding unsupported column as null");
                    None
                }
            }
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// 判断语句是否产出行结果
fn statement_returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.contains("RETURNING")
}
