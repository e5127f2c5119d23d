//! Coherence Operator Common - 跨模块共享工具
//!
//! 该模块提供 Operator 各组件共享的错误类型、API 调用重试策略
//! 以及本地网络地址发现等工具函数。

pub mod error;
pub mod net;
pub mod retry;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use retry::{retry_on_too_many_requests, RetryPolicy};
