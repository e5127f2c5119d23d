//! 错误处理模块
//!
//! 该模块提供 Coherence Operator 各组件共享的错误类型，
//! 覆盖 Kubernetes API、超时、I/O 以及网络相关的失败。

use std::io;
use thiserror::Error;

/// Coherence Operator 通用错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// 请求超时
    #[error("请求超时: {0}")]
    Timeout(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),
}

/// 通用结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// API 返回的 HTTP 状态码（如果有）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Kube(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    /// 是否为 404 Not Found
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// 是否为 409 AlreadyExists / Conflict
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// 是否为 429 Too Many Requests
    pub fn is_too_many_requests(&self) -> bool {
        self.status_code() == Some(429)
    }
}
