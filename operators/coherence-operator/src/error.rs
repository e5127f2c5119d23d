//! 协调错误类型
//!
//! 每种错误对应一种重新入队策略，由控制器的 `error_policy` 使用。

use std::time::Duration;
use thiserror::Error;

use crate::patch::PatchError;

/// 失败后默认的重新入队间隔
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// 协调错误
#[derive(Error, Debug)]
pub enum Error {
    /// 可重试的 Kubernetes API 错误
    #[error("Kubernetes API 调用失败: {0}")]
    TransientApi(#[source] coherence_common::Error),

    /// 无法构造三路合并补丁
    #[error("构造合并补丁失败: {0}")]
    Merge(String),

    /// 状态存储读写失败
    #[error("状态存储读写失败: {0}")]
    Store(String),

    /// 规范自相矛盾，需要用户修改
    #[error("规范无效: {0}")]
    FatalSpec(String),

    /// 无法设置所有者引用
    #[error("设置所有者引用失败: {0}")]
    Ownership(String),

    /// 主资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),
}

/// 协调结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 失败后的重新入队策略，None 表示等待用户修改规范
    pub fn requeue(&self) -> Option<Duration> {
        match self {
            Error::FatalSpec(_) | Error::Ownership(_) | Error::NotFound(_) => None,
            Error::TransientApi(_) | Error::Merge(_) | Error::Store(_) => Some(DEFAULT_ERROR_REQUEUE),
        }
    }

    /// 是否为致命的规范错误
    pub fn is_fatal(&self) -> bool {
        self.requeue().is_none() && !matches!(self, Error::NotFound(_))
    }

    /// 是否为 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::TransientApi(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// 是否为 409（对象已存在）
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransientApi(e) if e.is_conflict())
    }

    /// 事件和状态中使用的原因
    pub fn reason(&self) -> &'static str {
        match self {
            Error::TransientApi(_) => "TransientApiError",
            Error::Merge(_) => "MergeError",
            Error::Store(_) => "StoreError",
            Error::FatalSpec(_) => "FatalSpecError",
            Error::Ownership(_) => "OwnershipError",
            Error::NotFound(_) => "NotFound",
        }
    }
}

impl From<coherence_common::Error> for Error {
    fn from(e: coherence_common::Error) -> Self {
        Error::TransientApi(e)
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::TransientApi(e.into())
    }
}

impl From<PatchError> for Error {
    fn from(e: PatchError) -> Self {
        Error::Merge(e.to_string())
    }
}
