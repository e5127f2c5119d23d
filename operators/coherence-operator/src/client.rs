//! Kubernetes 访问层
//!
//! 协调器对集群的所有读写都经过 `KubeOps`，生产实现包装 `kube::Client`，
//! 测试中可以替换为内存实现或 mock。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use coherence_common::{retry_on_too_many_requests, RetryPolicy};

use crate::crd::{Coherence, CoherenceCluster, CoherenceClusterStatus, CoherenceStatus};
use crate::error::{Error, Result};
use crate::patch::PatchType;
use crate::resources::ResourceKind;

/// 事件上报组件名
pub const CONTROLLER_NAME: &str = "coherence-operator";

/// 待上报的 Kubernetes 事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub warning: bool,
    pub reason: String,
    pub note: String,
    pub action: String,
}

impl EventRecord {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason: reason.to_string(),
            note: note.into(),
            action: action.to_string(),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            warning: true,
            ..Self::normal(reason, action, note)
        }
    }
}

/// 协调器使用的集群操作
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KubeOps: Send + Sync {
    /// 读取子资源，不存在时返回 None
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>>;
    /// 创建子资源，已存在时返回 409 错误
    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<()>;
    /// 整体替换子资源
    async fn replace(&self, kind: ResourceKind, namespace: &str, name: &str, object: &Value) -> Result<()>;
    /// 对子资源打补丁
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<()>;
    /// 后台级联删除子资源，不存在视为成功
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    async fn get_coherence(&self, namespace: &str, name: &str) -> Result<Option<Coherence>>;
    async fn list_coherence(&self, namespace: &str, selector: &str) -> Result<Vec<Coherence>>;
    async fn create_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()>;
    async fn replace_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()>;
    async fn delete_coherence(&self, namespace: &str, name: &str) -> Result<()>;
    /// 对 Coherence 规范打 JSON merge 补丁
    async fn patch_coherence_spec(&self, namespace: &str, name: &str, patch: &Value) -> Result<()>;
    async fn patch_coherence_status(&self, namespace: &str, name: &str, status: &CoherenceStatus) -> Result<()>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<CoherenceCluster>>;
    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CoherenceClusterStatus,
    ) -> Result<()>;

    /// 上报事件，失败只记录日志
    async fn publish_event(&self, reference: &ObjectReference, event: &EventRecord);

    /// 节点标签，节点不存在时返回 None
    async fn node_labels(&self, node: &str) -> Result<Option<BTreeMap<String, String>>>;
}

/// 基于 kube::Client 的实现
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    retry: RetryPolicy,
    reporter: Reporter,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn dynamic(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn coherence(&self, namespace: &str) -> Api<Coherence> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn clusters(&self, namespace: &str) -> Api<CoherenceCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn to_dynamic(object: &Value) -> Result<DynamicObject> {
    serde_json::from_value(object.clone()).map_err(|e| Error::Merge(format!("对象格式错误: {}", e)))
}

fn to_value(object: &DynamicObject) -> Result<Value> {
    serde_json::to_value(object).map_err(|e| Error::Merge(format!("对象序列化失败: {}", e)))
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl KubeOps for KubeClient {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>> {
        let api = self.dynamic(kind, namespace);
        let object = retry_on_too_many_requests(&self.retry, || api.get_opt(name)).await?;
        object.as_ref().map(to_value).transpose()
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<()> {
        let api = self.dynamic(kind, namespace);
        let object = to_dynamic(object)?;
        let pp = PostParams::default();
        retry_on_too_many_requests(&self.retry, || api.create(&pp, &object)).await?;
        Ok(())
    }

    async fn replace(&self, kind: ResourceKind, namespace: &str, name: &str, object: &Value) -> Result<()> {
        let api = self.dynamic(kind, namespace);
        let object = to_dynamic(object)?;
        let pp = PostParams::default();
        retry_on_too_many_requests(&self.retry, || api.replace(name, &pp, &object)).await?;
        Ok(())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<()> {
        let api = self.dynamic(kind, namespace);
        let patch = match patch_type {
            PatchType::Strategic => Patch::Strategic(patch.clone()),
            PatchType::Merge => Patch::Merge(patch.clone()),
        };
        let pp = PatchParams::default();
        retry_on_too_many_requests(&self.retry, || api.patch(name, &pp, &patch)).await?;
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let api = self.dynamic(kind, namespace);
        let dp = DeleteParams::background();
        let result = retry_on_too_many_requests(&self.retry, || api.delete(name, &dp))
            .await
            .map(|_| ())
            .map_err(Error::from);
        ignore_not_found(result)
    }

    async fn get_coherence(&self, namespace: &str, name: &str) -> Result<Option<Coherence>> {
        let api = self.coherence(namespace);
        Ok(retry_on_too_many_requests(&self.retry, || api.get_opt(name)).await?)
    }

    async fn list_coherence(&self, namespace: &str, selector: &str) -> Result<Vec<Coherence>> {
        let api = self.coherence(namespace);
        let lp = ListParams::default().labels(selector);
        let list = retry_on_too_many_requests(&self.retry, || api.list(&lp)).await?;
        Ok(list.items)
    }

    async fn create_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()> {
        let api = self.coherence(namespace);
        let pp = PostParams::default();
        retry_on_too_many_requests(&self.retry, || api.create(&pp, coherence)).await?;
        Ok(())
    }

    async fn replace_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()> {
        let api = self.coherence(namespace);
        let name = kube::ResourceExt::name_any(coherence);
        let pp = PostParams::default();
        retry_on_too_many_requests(&self.retry, || api.replace(&name, &pp, coherence)).await?;
        Ok(())
    }

    async fn delete_coherence(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.coherence(namespace);
        let dp = DeleteParams::background();
        let result = retry_on_too_many_requests(&self.retry, || api.delete(name, &dp))
            .await
            .map(|_| ())
            .map_err(Error::from);
        ignore_not_found(result)
    }

    async fn patch_coherence_spec(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let api = self.coherence(namespace);
        let patch = Patch::Merge(json!({ "spec": patch }));
        let pp = PatchParams::default();
        retry_on_too_many_requests(&self.retry, || api.patch(name, &pp, &patch)).await?;
        Ok(())
    }

    async fn patch_coherence_status(&self, namespace: &str, name: &str, status: &CoherenceStatus) -> Result<()> {
        let api = self.coherence(namespace);
        let patch = Patch::Merge(json!({ "status": status }));
        let pp = PatchParams::default();
        retry_on_too_many_requests(&self.retry, || api.patch_status(name, &pp, &patch)).await?;
        Ok(())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<CoherenceCluster>> {
        let api = self.clusters(namespace);
        Ok(retry_on_too_many_requests(&self.retry, || api.get_opt(name)).await?)
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CoherenceClusterStatus,
    ) -> Result<()> {
        let api = self.clusters(namespace);
        let patch = Patch::Merge(json!({ "status": status }));
        let pp = PatchParams::default();
        retry_on_too_many_requests(&self.retry, || api.patch_status(name, &pp, &patch)).await?;
        Ok(())
    }

    async fn publish_event(&self, reference: &ObjectReference, event: &EventRecord) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference.clone());
        let result = recorder
            .publish(Event {
                type_: if event.warning { EventType::Warning } else { EventType::Normal },
                reason: event.reason.clone(),
                note: Some(event.note.clone()),
                action: event.action.clone(),
                secondary: None,
            })
            .await;
        match result {
            Ok(()) => debug!(reason = %event.reason, "事件已上报"),
            Err(e) => warn!(reason = %event.reason, error = %e, "事件上报失败"),
        }
    }

    async fn node_labels(&self, node: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = retry_on_too_many_requests(&self.retry, || api.get_opt(node)).await?;
        Ok(node.map(|n| n.metadata.labels.unwrap_or_default()))
    }
}
