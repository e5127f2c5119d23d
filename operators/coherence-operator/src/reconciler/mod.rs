//! 子协调器
//!
//! 每个子协调器负责一种资源类型，按差异引擎给出的操作创建、更新或删除对象。
//! 更新使用 (上次期望, 当前实际, 本次期望) 三路补丁，只有补丁非空时才发送。

pub mod statefulset;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::KubeOps;
use crate::crd::Coherence;
use crate::error::{Error, Result};
use crate::patch::{three_way_patch, PatchType};
use crate::resources::{Operation, ResourceKind, Resources};

/// 协调结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Requeue(Duration),
}

impl Outcome {
    /// 合并两个结果，任一方要求重新入队时取较短的间隔
    pub fn or(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Done, o) | (o, Outcome::Done) => o,
            (Outcome::Requeue(a), Outcome::Requeue(b)) => Outcome::Requeue(a.min(b)),
        }
    }

    pub fn is_requeue(&self) -> bool {
        matches!(self, Outcome::Requeue(_))
    }

    pub fn into_action(self) -> Action {
        match self {
            Outcome::Done => Action::await_change(),
            Outcome::Requeue(after) => Action::requeue(after),
        }
    }
}

/// 单一资源类型的子协调器
#[derive(Clone)]
pub struct SubReconciler {
    client: Arc<dyn KubeOps>,
    kind: ResourceKind,
    patch_type: PatchType,
}

impl SubReconciler {
    /// 没有 strategic merge 元数据的类型固定使用 JSON merge
    pub fn new(client: Arc<dyn KubeOps>, kind: ResourceKind, patch_type: PatchType) -> Self {
        let patch_type = if kind.supports_strategic() {
            patch_type
        } else {
            PatchType::Merge
        };
        Self {
            client,
            kind,
            patch_type,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// 依次执行本类型的全部操作
    pub async fn reconcile(&self, owner: &Coherence, ops: &[Operation], latest: &Resources) -> Result<Outcome> {
        let namespace = owner.namespace().unwrap_or_default();
        for op in ops {
            match op {
                Operation::Create { name } => self.create(&namespace, name, latest).await?,
                Operation::Update {
                    name,
                    previous,
                    desired,
                } => self.update(&namespace, name, Some(previous), desired).await?,
                Operation::Delete { name } => self.delete(&namespace, name).await?,
            }
        }
        Ok(Outcome::Done)
    }

    /// 创建对象，已存在时转为更新
    pub async fn create(&self, namespace: &str, name: &str, latest: &Resources) -> Result<()> {
        let desired = latest
            .get(self.kind, name)
            .map(|r| r.spec.clone())
            .ok_or_else(|| Error::Store(format!("期望集合中缺少 {} {}", self.kind, name)))?;

        match self.client.create(self.kind, namespace, &desired).await {
            Ok(()) => {
                info!(kind = %self.kind, namespace, name, "已创建");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!(kind = %self.kind, namespace, name, "对象已存在，转为更新");
                self.update(namespace, name, None, &desired).await
            }
            Err(e) => Err(e),
        }
    }

    /// 三路补丁更新，实际对象不存在时重新创建
    pub async fn update(&self, namespace: &str, name: &str, previous: Option<&Value>, desired: &Value) -> Result<()> {
        let Some(current) = self.client.get(self.kind, namespace, name).await? else {
            info!(kind = %self.kind, namespace, name, "对象不存在，重新创建");
            return self.client.create(self.kind, namespace, desired).await;
        };

        match three_way_patch(previous, &current, desired, self.patch_type)? {
            Some(patch) => {
                self.client
                    .patch(self.kind, namespace, name, &patch, self.patch_type)
                    .await?;
                info!(kind = %self.kind, namespace, name, "已更新");
            }
            None => debug!(kind = %self.kind, namespace, name, "无需更新"),
        }
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.client.delete(self.kind, namespace, name).await?;
        info!(kind = %self.kind, namespace, name, "已删除");
        Ok(())
    }
}
