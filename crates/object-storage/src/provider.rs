//! S3 兼容对象存储客户端
//!
//! 包装上传、下载、删除与分页列举。每个操作在传输/认证失败时返回
//! 本层错误；不做自动重试，重试属于调用方的决策。凭证与客户端为
//! 进程级资源，可在并发调用间只读共享。

use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{info, instrument};

use stratum_shared::config::S3Config;

use crate::error::{StorageError, StorageResult};

/// 对象存储操作契约
///
/// 健康检查与上层消费方依赖该抽象而非具体客户端。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传对象
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// 读取对象内容
    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// 删除对象（对不存在的键幂等）
    async fn delete_file(&self, key: &str) -> StorageResult<()>;

    /// 列举指定前缀下的全部对象键（合并所有分页）
    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// 列举单页对象键，返回下一页的续传令牌
    ///
    /// 令牌为 None 时从头开始；返回的令牌为 None 表示已到末尾。
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<String>, Option<String>)>;

    /// 连通性探测
    async fn health_check(&self) -> StorageResult<()>;
}

/// 校验对象键非空
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("对象键不能为空".to_string()));
    }
    Ok(())
}

/// S3 对象存储客户端
pub struct S3Provider {
    client: Client,
    bucket: String,
}

impl S3Provider {
    /// 按配置构造客户端
    ///
    /// 支持自定义端点与 path-style 寻址，以兼容 MinIO 等自建服务；
    /// 未提供静态凭证时走默认凭证链（环境变量、实例角色等）。
    #[instrument(skip(config))]
    pub async fn connect(config: &S3Config) -> Self {
        info!(bucket = %config.bucket, "Connecting to object storage...");

        let mut loader = aws_config::from_env()
            .region(Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
                    .read_timeout(Duration::from_secs(config.read_timeout_seconds))
                    .build(),
            );
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "stratum-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    /// 目标桶名
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Provider {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        if data.is_empty() {
            return Err(StorageError::EmptyBody {
                key: key.to_string(),
            });
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StorageError::Transport(format!("put_object: {err}")))?;
        Ok(())
    }

    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_key())
                {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Transport(format!("get_object: {err}"))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Transport(format!("get_object body: {err}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Transport(format!("delete_object: {err}")))?;
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|err| StorageError::Transport(format!("list_objects_v2: {err}")))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<String>, Option<String>)> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StorageError::Transport(format!("list_objects_v2: {err}")))?;
        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        Ok((
            keys,
            response.next_continuation_token().map(str::to_string),
        ))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| StorageError::Transport(format!("head_bucket: {err}")))?;
        Ok(())
    }
}
