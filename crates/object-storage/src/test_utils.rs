//! 测试工具模块
//!
//! 提供无外部依赖的内存对象存储，用于健康检查与消费方的测试。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::provider::{validate_key, ObjectStore};

/// 内存对象存储的分页大小，取小值便于测试分页逻辑
const PAGE_SIZE: usize = 2;

/// 内存对象存储
///
/// 键按字典序列举，续传令牌为上一页最后一个键。`fail_all` 开关让
/// 所有操作返回传输错误，用于健康检查失败路径的测试。
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_all: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续所有操作失败
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// 恢复正常
    pub fn recover(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
    }

    fn check_fault(&self) -> StorageResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StorageError::Transport(
                "injected storage failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.check_fault()?;
        validate_key(key)?;
        if data.is_empty() {
            return Err(StorageError::EmptyBody {
                key: key.to_string(),
            });
        }
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.check_fault()?;
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        self.check_fault()?;
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_fault()?;
        Ok(self.keys_with_prefix(prefix).await)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<String>, Option<String>)> {
        self.check_fault()?;
        let keys = self.keys_with_prefix(prefix).await;
        let start = match &continuation_token {
            Some(token) => keys.iter().position(|key| key > token).unwrap_or(keys.len()),
            None => 0,
        };
        let page: Vec<String> = keys[start..].iter().take(PAGE_SIZE).cloned().collect();
        let next_token = if start + page.len() < keys.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok((page, next_token))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check_fault()
    }
}
