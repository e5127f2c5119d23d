//! StatefulSet 子协调器
//!
//! 除了创建、更新、删除之外，还根据 StatefulSet 的观测状态维护部署的相位。

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use kube::ResourceExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Outcome, SubReconciler};
use crate::client::KubeOps;
use crate::crd::status::status_of;
use crate::crd::{Coherence, Phase};
use crate::error::{Error, Result};
use crate::patch::PatchType;
use crate::resources::{Operation, ResourceKind, Resources};

/// 未就绪时的重新检查间隔
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(30);

fn replicas(object: &Value) -> Option<i64> {
    object.pointer("/spec/replicas").and_then(Value::as_i64)
}

pub struct StatefulSetReconciler {
    client: Arc<dyn KubeOps>,
    inner: SubReconciler,
}

impl StatefulSetReconciler {
    pub fn new(client: Arc<dyn KubeOps>, patch_type: PatchType) -> Self {
        Self {
            inner: SubReconciler::new(client.clone(), ResourceKind::StatefulSet, patch_type),
            client,
        }
    }

    /// 执行操作并根据观测状态更新部署相位；没有操作时也会检查状态
    pub async fn reconcile(
        &self,
        owner: &Coherence,
        ops: &[Operation],
        latest: &Resources,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let namespace = owner.namespace().unwrap_or_default();
        let name = owner.name_any();
        let mut status = status_of(owner);
        let mut changed = false;

        for op in ops {
            match op {
                // 相位在创建后保持 Initialized，由观测状态推进
                Operation::Create { name } => self.inner.create(&namespace, name, latest).await?,
                Operation::Update {
                    name,
                    previous,
                    desired,
                } => {
                    self.inner.update(&namespace, name, Some(previous), desired).await?;
                    if replicas(previous) != replicas(desired) {
                        changed = status.set_phase(Phase::Scaling, now) || changed;
                    }
                }
                Operation::Delete { name } => self.inner.delete(&namespace, name).await?,
            }
        }

        let observed = if latest.get(ResourceKind::StatefulSet, &name).is_some() {
            self.observed_status(&namespace, &name).await?
        } else {
            None
        };
        changed = status.update_from_statefulset(owner, observed.as_ref(), now) || changed;

        if changed {
            self.client.patch_coherence_status(&namespace, &name, &status).await?;
            info!(namespace = %namespace, name = %name, phase = ?status.phase, "部署状态已更新");
        }

        if owner.spec.get_replicas() > 0 && !status.is_ready() {
            debug!(namespace = %namespace, name = %name, "副本尚未就绪，稍后重新检查");
            return Ok(Outcome::Requeue(NOT_READY_REQUEUE));
        }
        Ok(Outcome::Done)
    }

    async fn observed_status(&self, namespace: &str, name: &str) -> Result<Option<StatefulSetStatus>> {
        let Some(object) = self.client.get(ResourceKind::StatefulSet, namespace, name).await? else {
            return Ok(None);
        };
        let sts: StatefulSet = serde_json::from_value(object)
            .map_err(|e| Error::Merge(format!("StatefulSet {}/{} 格式错误: {}", namespace, name, e)))?;
        Ok(sts.status)
    }
}
