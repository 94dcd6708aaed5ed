//! 端到端测试
//!
//! 测试覆盖完整的框架流程，包括：
//! - 仓储全链路（新增/更新/提交/刷新与回滚边界）
//! - 连接探活的错误类别区分
//! - 健康检查与对象存储的组合裁决

mod health_flow;
mod repository_flow;
