//! 集群协调模块（早期形态）
//!
//! 一个 `CoherenceCluster` 展开为每个角色一个子 `Coherence` 部署，
//! 外加集群共享的 WKA 服务。子部署由部署协调器继续处理。

use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::{EventRecord, KubeOps};
use crate::crd::constants::*;
use crate::crd::{Coherence, CoherenceCluster, CoherenceClusterStatus, CoherenceResourceSpec};
use crate::error::{Error, Result};
use crate::flags::OperatorFlags;
use crate::lock::{lock_key, LockRegistry};
use crate::merge::effective_role_spec;
use crate::reconciler::{Outcome, SubReconciler};
use crate::resources::{ResourceKind, Resources};
use crate::templates::services::wka_service;

/// 集群协调器
pub struct ClusterReconciler {
    client: Arc<dyn KubeOps>,
    flags: Arc<OperatorFlags>,
    locks: LockRegistry,
}

impl ClusterReconciler {
    pub fn new(client: Arc<dyn KubeOps>, flags: Arc<OperatorFlags>) -> Self {
        Self {
            client,
            flags,
            locks: LockRegistry::global(),
        }
    }

    pub fn with_locks(mut self, locks: LockRegistry) -> Self {
        self.locks = locks;
        self
    }

    /// 控制器入口
    pub async fn reconcile_object(&self, cluster: Arc<CoherenceCluster>) -> Result<Action> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        Ok(self.reconcile(&namespace, &name).await?.into_action())
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let key = format!("cluster/{}", lock_key(namespace, name));
        let Some(_guard) = self.locks.try_lock(&key) else {
            debug!(namespace, name, "集群正在被其他协调处理，稍后重试");
            return Ok(Outcome::Requeue(std::time::Duration::ZERO));
        };

        let Some(cluster) = self.client.get_cluster(namespace, name).await? else {
            debug!(namespace, name, "集群不存在，视为已删除");
            return Ok(Outcome::Done);
        };
        if cluster.metadata.deletion_timestamp.is_some() {
            // 子部署通过 ownerReference 由垃圾回收删除
            return Ok(Outcome::Done);
        }

        info!(namespace, name, "协调 Coherence 集群");

        let selector = format!("{}={}", LABEL_COHERENCE_CLUSTER, name);
        let existing: BTreeMap<String, Coherence> = self
            .client
            .list_coherence(namespace, &selector)
            .await?
            .into_iter()
            .map(|c| (c.name_any(), c))
            .collect();

        let mut wanted = HashSet::new();
        let mut role_names = Vec::new();
        for role in cluster.spec.role_specs() {
            let effective = self.effective_spec(&cluster, &role);
            let role_name = effective.get_role_name().to_string();
            let child_name = cluster.role_deployment_name(&role_name);
            if !wanted.insert(child_name.clone()) {
                return Err(Error::FatalSpec(format!("集群 {} 中角色 {} 重复", name, role_name)));
            }
            role_names.push(role_name.clone());

            let current = existing.get(&child_name);
            if effective.replicas == Some(0) {
                if current.is_some() {
                    self.delete_child(&cluster, &child_name, "副本数为 0").await?;
                }
                continue;
            }

            let desired = self.child(&cluster, &child_name, &role_name, effective)?;
            match current {
                None => {
                    self.client.create_coherence(namespace, &desired).await?;
                    info!(namespace, name = %child_name, "已创建角色部署");
                    self.event(&cluster, EventRecord::normal(
                        "SuccessfulCreate",
                        "Create",
                        format!("create Role {} in CoherenceCluster {} successful", role_name, name),
                    ))
                    .await;
                }
                Some(current) if current.spec != desired.spec || current.labels() != desired.labels() => {
                    let mut updated = current.clone();
                    updated.spec = desired.spec;
                    updated.metadata.labels = desired.metadata.labels;
                    if let Err(e) = self.client.replace_coherence(namespace, &updated).await {
                        self.event(&cluster, EventRecord::warning(
                            "FailedUpdate",
                            "Update",
                            format!("update Role {} in CoherenceCluster {} failed: {}", role_name, name, e),
                        ))
                        .await;
                        return Err(e);
                    }
                    info!(namespace, name = %child_name, "已更新角色部署");
                    self.event(&cluster, EventRecord::normal(
                        "SuccessfulUpdate",
                        "Update",
                        format!("update Role {} in CoherenceCluster {} successful", role_name, name),
                    ))
                    .await;
                }
                Some(_) => debug!(namespace, name = %child_name, "角色部署无变化"),
            }
        }

        // 不再声明的角色
        for child_name in existing.keys().filter(|n| !wanted.contains(*n)) {
            self.delete_child(&cluster, child_name, "角色已移除").await?;
        }

        self.ensure_wka_service(&cluster).await?;

        let status = CoherenceClusterStatus {
            roles: role_names.len() as i32,
            role_names,
        };
        if cluster.status.as_ref() != Some(&status) {
            self.client.patch_cluster_status(namespace, name, &status).await?;
        }

        Ok(Outcome::Done)
    }

    /// 角色覆盖集群默认值，副本数与角色名总是显式写出
    fn effective_spec(&self, cluster: &CoherenceCluster, role: &CoherenceResourceSpec) -> CoherenceResourceSpec {
        let mut effective = effective_role_spec(&cluster.spec.defaults, role);
        effective.cluster = Some(cluster.name_any());
        effective.replicas = Some(effective.get_replicas());
        effective.role = Some(effective.get_role_name().to_string());
        effective
    }

    fn child(
        &self,
        cluster: &CoherenceCluster,
        child_name: &str,
        role_name: &str,
        spec: CoherenceResourceSpec,
    ) -> Result<Coherence> {
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or_else(|| Error::Ownership(format!("集群 {} 缺少 uid", cluster.name_any())))?;
        let mut child = Coherence::new(child_name, spec);
        child.metadata.namespace = cluster.namespace();
        child.metadata.labels = Some(BTreeMap::from([
            (LABEL_COHERENCE_CLUSTER.to_string(), cluster.name_any()),
            (LABEL_COHERENCE_ROLE.to_string(), role_name.to_string()),
        ]));
        child.metadata.owner_references = Some(vec![owner]);
        Ok(child)
    }

    async fn delete_child(&self, cluster: &CoherenceCluster, child_name: &str, why: &str) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        self.client.delete_coherence(&namespace, child_name).await?;
        info!(namespace = %namespace, name = %child_name, reason = why, "已删除角色部署");
        self.event(cluster, EventRecord::normal(
            "SuccessfulDelete",
            "Delete",
            format!("delete Role {} in CoherenceCluster {} successful", child_name, cluster.name_any()),
        ))
        .await;
        Ok(())
    }

    /// 集群共享的 WKA 服务，归属于集群
    async fn ensure_wka_service(&self, cluster: &CoherenceCluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.wka_service_name();
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or_else(|| Error::Ownership(format!("集群 {} 缺少 uid", cluster.name_any())))?;

        let metadata = ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(BTreeMap::from([
                (LABEL_COHERENCE_CLUSTER.to_string(), cluster.name_any()),
                (LABEL_COMPONENT.to_string(), COMPONENT_WKA_SERVICE.to_string()),
            ])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        };
        let mut set = Resources::new();
        set.insert(ResourceKind::Service, name.clone(), &wka_service(metadata, &cluster.name_any()))?;
        let desired = set
            .get(ResourceKind::Service, &name)
            .map(|r| r.spec.clone())
            .ok_or_else(|| Error::Store(format!("缺少 WKA 服务 {}", name)))?;

        SubReconciler::new(self.client.clone(), ResourceKind::Service, self.flags.patch_type())
            .update(&namespace, &name, None, &desired)
            .await
    }

    async fn event(&self, cluster: &CoherenceCluster, event: EventRecord) {
        self.client.publish_event(&cluster.object_ref(&()), &event).await;
    }

    pub fn handle_error(&self, cluster: Arc<CoherenceCluster>, error: &Error) -> Action {
        error!(
            namespace = ?cluster.namespace(),
            name = %cluster.name_any(),
            reason = error.reason(),
            "协调集群失败: {}",
            error
        );
        match error.requeue() {
            Some(after) => Action::requeue(after),
            None => {
                warn!(name = %cluster.name_any(), "等待集群规范变更后再处理");
                Action::await_change()
            }
        }
    }
}
