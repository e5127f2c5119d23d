//! 自定义资源定义模块
//!
//! 该模块定义了 Operator 管理的自定义资源类型 `Coherence` 与 `CoherenceCluster`，
//! 以及它们的状态和常量。

pub mod cluster;
pub mod coherence;
pub mod constants;
pub mod status;

pub use cluster::{CoherenceCluster, CoherenceClusterSpec, CoherenceClusterStatus};
pub use coherence::*;
pub use status::{Condition, CoherenceStatus, Phase};
