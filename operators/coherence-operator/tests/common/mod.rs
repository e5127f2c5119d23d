//! 内存中的 Kubernetes 实现，用于驱动协调器

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use coherence_operator::client::{EventRecord, KubeOps};
use coherence_operator::crd::{
    Coherence, CoherenceCluster, CoherenceClusterStatus, CoherenceResourceSpec, CoherenceStatus,
};
use coherence_operator::error::{Error, Result};
use coherence_operator::patch::PatchType;
use coherence_operator::resources::ResourceKind;

/// 记录的写操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ResourceKind, String),
    Replace(ResourceKind, String),
    Patch(ResourceKind, String),
    Delete(ResourceKind, String),
    CreateCoherence(String),
    ReplaceCoherence(String),
    DeleteCoherence(String),
    PatchCoherenceSpec(String),
    PatchCoherenceStatus(String),
}

type Key = (String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<(ResourceKind, String, String), Value>,
    deployments: BTreeMap<Key, Coherence>,
    clusters: BTreeMap<Key, CoherenceCluster>,
    nodes: BTreeMap<String, BTreeMap<String, String>>,
    calls: Vec<Call>,
    events: Vec<EventRecord>,
    failures: Vec<(Call, Failure)>,
    next_uid: usize,
}

/// 内存集群
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

fn conflict(name: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} already exists", name),
        reason: "AlreadyExists".into(),
        code: 409,
    }))
}

/// 注入的写入失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// API Server 返回的 HTTP 状态码
    Api(u16),
    /// 补丁无法应用
    Merge,
}

impl Failure {
    fn error(self, name: &str) -> Error {
        match self {
            Failure::Api(code) => Error::from(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: format!("injected failure for {}", name),
                reason: "InternalError".into(),
                code,
            })),
            Failure::Merge => Error::Merge(format!("injected failure for {}", name)),
        }
    }
}

/// strategic merge 列表的合并键，与 API Server 的类型元数据一致
fn list_key(field: &str, in_container: bool) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "env" | "volumes" | "imagePullSecrets" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        "hostAliases" => Some("ip"),
        "ownerReferences" => Some("uid"),
        "ports" => Some(if in_container { "containerPort" } else { "port" }),
        _ => None,
    }
}

/// 按 API Server 的方式应用 strategic merge patch
pub fn strategic_merge(target: &mut Value, patch: &Value, in_container: bool) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target) = target else {
        return;
    };
    for (field, value) in patch {
        match (value, list_key(field, in_container)) {
            (Value::Null, _) => {
                target.remove(field);
            }
            (Value::Array(items), Some(key)) => {
                let entry = target.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(list) = entry {
                    let nested = in_container || field == "containers" || field == "initContainers";
                    merge_keyed(list, items, key, nested);
                }
            }
            (Value::Array(_), None) => {
                target.insert(field.clone(), value.clone());
            }
            _ => strategic_merge(target.entry(field.clone()).or_insert(Value::Null), value, in_container),
        }
    }
}

fn merge_keyed(list: &mut Vec<Value>, items: &[Value], key: &str, in_container: bool) {
    for item in items {
        let position = item
            .get(key)
            .and_then(|k| list.iter().position(|e| e.get(key) == Some(k)));
        let delete = item.get("$patch").and_then(Value::as_str) == Some("delete");
        match (position, delete) {
            (Some(idx), true) => {
                list.remove(idx);
            }
            (None, true) => {}
            (Some(idx), false) => strategic_merge(&mut list[idx], item, in_container),
            (None, false) => list.push(item.clone()),
        }
    }
}

fn name_of(object: &Value) -> String {
    object["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// 接下来 `times` 次匹配的写操作返回指定错误
    pub fn fail_on(&self, call: Call, failure: Failure, times: usize) {
        self.with(|s| s.failures.extend(std::iter::repeat((call, failure)).take(times)))
    }

    fn injected(state: &mut State, call: &Call) -> Option<Failure> {
        let idx = state.failures.iter().position(|(c, _)| c == call)?;
        Some(state.failures.remove(idx).1)
    }

    fn uid(state: &mut State) -> String {
        state.next_uid += 1;
        format!("uid-{}", state.next_uid)
    }

    /// 放入一个部署，返回带 uid 的副本
    pub fn add_deployment(&self, namespace: &str, name: &str, spec: CoherenceResourceSpec) -> Coherence {
        self.with(|s| {
            let mut coh = Coherence::new(name, spec);
            coh.metadata.namespace = Some(namespace.to_string());
            coh.metadata.uid = Some(Self::uid(s));
            s.deployments
                .insert((namespace.to_string(), name.to_string()), coh.clone());
            coh
        })
    }

    pub fn add_cluster(&self, mut cluster: CoherenceCluster) {
        self.with(|s| {
            cluster.metadata.uid = Some(Self::uid(s));
            let key = (cluster.namespace().unwrap_or_default(), cluster.name_any());
            s.clusters.insert(key, cluster);
        })
    }

    pub fn add_node(&self, node: &str, labels: BTreeMap<String, String>) {
        self.with(|s| s.nodes.insert(node.to_string(), labels));
    }

    /// 用户修改部署规范
    pub fn set_spec(&self, namespace: &str, name: &str, spec: CoherenceResourceSpec) {
        self.with(|s| {
            if let Some(coh) = s.deployments.get_mut(&(namespace.to_string(), name.to_string())) {
                coh.spec = spec;
            }
        })
    }

    pub fn mark_deleted(&self, namespace: &str, name: &str) {
        self.with(|s| {
            if let Some(coh) = s.deployments.get_mut(&(namespace.to_string(), name.to_string())) {
                coh.metadata.deletion_timestamp =
                    Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()));
            }
        })
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Coherence> {
        self.with(|s| s.deployments.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.with(|s| {
            s.objects
                .get(&(kind, namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.with(|s| {
            s.objects
                .keys()
                .filter(|(k, _, _)| *k == kind)
                .map(|(_, _, n)| n.clone())
                .collect()
        })
    }

    /// 设置 StatefulSet 的观测状态
    pub fn set_statefulset_status(&self, namespace: &str, name: &str, status: Value) {
        self.with(|s| {
            if let Some(sts) = s
                .objects
                .get_mut(&(ResourceKind::StatefulSet, namespace.to_string(), name.to_string()))
            {
                sts["status"] = status;
            }
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    /// 除状态存储外的写操作
    pub fn child_writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                Call::Create(_, n) | Call::Replace(_, n) | Call::Patch(_, n) | Call::Delete(_, n) => {
                    !n.ends_with("-storage")
                }
                _ => false,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear())
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.with(|s| s.events.clone())
    }
}

#[async_trait]
impl KubeOps for FakeKube {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>> {
        Ok(self.object(kind, namespace, name))
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<()> {
        let name = name_of(object);
        self.with(|s| {
            if let Some(failure) = Self::injected(s, &Call::Create(kind, name.clone())) {
                return Err(failure.error(&name));
            }
            let key = (kind, namespace.to_string(), name.clone());
            if s.objects.contains_key(&key) {
                return Err(conflict(&name));
            }
            let mut object = object.clone();
            object["metadata"]["uid"] = Value::from(Self::uid(s));
            s.objects.insert(key, object);
            s.calls.push(Call::Create(kind, name));
            Ok(())
        })
    }

    async fn replace(&self, kind: ResourceKind, namespace: &str, name: &str, object: &Value) -> Result<()> {
        self.with(|s| {
            s.objects
                .insert((kind, namespace.to_string(), name.to_string()), object.clone());
            s.calls.push(Call::Replace(kind, name.to_string()));
            Ok(())
        })
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<()> {
        self.with(|s| {
            if let Some(failure) = Self::injected(s, &Call::Patch(kind, name.to_string())) {
                return Err(failure.error(name));
            }
            let key = (kind, namespace.to_string(), name.to_string());
            let Some(object) = s.objects.get_mut(&key) else {
                return Err(Error::NotFound(name.to_string()));
            };
            match patch_type {
                PatchType::Merge => json_patch::merge(object, patch),
                PatchType::Strategic => strategic_merge(object, patch, false),
            }
            s.calls.push(Call::Patch(kind, name.to_string()));
            Ok(())
        })
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.with(|s| {
            if s
                .objects
                .remove(&(kind, namespace.to_string(), name.to_string()))
                .is_some()
            {
                s.calls.push(Call::Delete(kind, name.to_string()));
            }
            Ok(())
        })
    }

    async fn get_coherence(&self, namespace: &str, name: &str) -> Result<Option<Coherence>> {
        Ok(self.deployment(namespace, name))
    }

    async fn list_coherence(&self, namespace: &str, selector: &str) -> Result<Vec<Coherence>> {
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        Ok(self.with(|s| {
            s.deployments
                .values()
                .filter(|c| c.namespace().as_deref() == Some(namespace))
                .filter(|c| c.labels().get(key).map(String::as_str) == Some(value))
                .cloned()
                .collect()
        }))
    }

    async fn create_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()> {
        self.with(|s| {
            let key = (namespace.to_string(), coherence.name_any());
            if s.deployments.contains_key(&key) {
                return Err(conflict(&key.1));
            }
            let mut coherence = coherence.clone();
            coherence.metadata.uid = Some(Self::uid(s));
            s.calls.push(Call::CreateCoherence(key.1.clone()));
            s.deployments.insert(key, coherence);
            Ok(())
        })
    }

    async fn replace_coherence(&self, namespace: &str, coherence: &Coherence) -> Result<()> {
        self.with(|s| {
            let key = (namespace.to_string(), coherence.name_any());
            s.calls.push(Call::ReplaceCoherence(key.1.clone()));
            s.deployments.insert(key, coherence.clone());
            Ok(())
        })
    }

    async fn delete_coherence(&self, namespace: &str, name: &str) -> Result<()> {
        self.with(|s| {
            if s
                .deployments
                .remove(&(namespace.to_string(), name.to_string()))
                .is_some()
            {
                s.calls.push(Call::DeleteCoherence(name.to_string()));
            }
            Ok(())
        })
    }

    async fn patch_coherence_spec(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.with(|s| {
            let Some(coh) = s.deployments.get_mut(&(namespace.to_string(), name.to_string())) else {
                return Err(Error::NotFound(name.to_string()));
            };
            let mut spec = serde_json::to_value(&coh.spec).map_err(|e| Error::Merge(e.to_string()))?;
            json_patch::merge(&mut spec, patch);
            coh.spec = serde_json::from_value(spec).map_err(|e| Error::Merge(e.to_string()))?;
            s.calls.push(Call::PatchCoherenceSpec(name.to_string()));
            Ok(())
        })
    }

    async fn patch_coherence_status(&self, namespace: &str, name: &str, status: &CoherenceStatus) -> Result<()> {
        self.with(|s| {
            let Some(coh) = s.deployments.get_mut(&(namespace.to_string(), name.to_string())) else {
                return Err(Error::NotFound(name.to_string()));
            };
            coh.status = Some(status.clone());
            s.calls.push(Call::PatchCoherenceStatus(name.to_string()));
            Ok(())
        })
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<CoherenceCluster>> {
        Ok(self.with(|s| s.clusters.get(&(namespace.to_string(), name.to_string())).cloned()))
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CoherenceClusterStatus,
    ) -> Result<()> {
        self.with(|s| {
            if let Some(cluster) = s.clusters.get_mut(&(namespace.to_string(), name.to_string())) {
                cluster.status = Some(status.clone());
            }
            Ok(())
        })
    }

    async fn publish_event(&self, _reference: &ObjectReference, event: &EventRecord) {
        self.with(|s| s.events.push(event.clone()));
    }

    async fn node_labels(&self, node: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.with(|s| s.nodes.get(node).cloned()))
    }
}
