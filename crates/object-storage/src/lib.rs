//! 对象存储客户端
//!
//! 面向 S3 兼容存储的异步客户端：上传、下载、删除、分页列举与
//! 连通性探测。消费方依赖 `ObjectStore` 抽象，具体实现由组合根注入。

pub mod error;
pub mod provider;
pub mod test_utils;

pub use error::{StorageError, StorageResult};
pub use provider::{ObjectStore, S3Provider};
