//! 期望资源集合与差异计算
//!
//! 合成器输出一组 `(kind, name) -> 对象` 映射，状态存储保存其序列化形式，
//! 差异引擎按类型比较上一次与本次的期望集合，生成创建、更新、删除操作。

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};

/// 子资源类型，声明顺序即派发顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
    Service,
    ServiceMonitor,
    StatefulSet,
}

impl ResourceKind {
    /// 按派发顺序排列的全部类型
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::Service,
        ResourceKind::ServiceMonitor,
        ResourceKind::StatefulSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::Service => "Service",
            ResourceKind::ServiceMonitor => "ServiceMonitor",
            ResourceKind::StatefulSet => "StatefulSet",
        }
    }

    /// 动态 API 所需的资源描述
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
            ResourceKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            ResourceKind::ServiceMonitor => ApiResource::from_gvk(&GroupVersionKind::gvk(
                "monitoring.coreos.com",
                "v1",
                "ServiceMonitor",
            )),
        }
    }

    /// 是否有 strategic merge 元数据（即内置类型）
    pub fn supports_strategic(&self) -> bool {
        !matches!(self, ResourceKind::ServiceMonitor)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个期望对象
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    pub spec: Value,
}

/// 期望对象集合，始终按 (kind, name) 排序
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Resources {
    #[serde(default)]
    items: Vec<Resource>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换对象
    pub fn insert<T: Serialize>(&mut self, kind: ResourceKind, name: impl Into<String>, object: &T) -> Result<()> {
        let spec = serde_json::to_value(object).map_err(|e| Error::FatalSpec(e.to_string()))?;
        self.insert_value(Resource {
            kind,
            name: name.into(),
            spec,
        });
        Ok(())
    }

    pub fn insert_value(&mut self, resource: Resource) {
        let key = (resource.kind, resource.name.as_str());
        match self.items.binary_search_by(|r| (r.kind, r.name.as_str()).cmp(&key)) {
            Ok(idx) => self.items[idx] = resource,
            Err(idx) => self.items.insert(idx, resource),
        }
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.items.iter().find(|r| r.kind == kind && r.name == name)
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.items.iter().filter(move |r| r.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 给每个对象设置唯一的所有者引用
    pub fn set_owner(&mut self, owner: &OwnerReference) -> Result<()> {
        let owner = serde_json::to_value(owner).map_err(|e| Error::Ownership(e.to_string()))?;
        for resource in &mut self.items {
            let metadata = resource
                .spec
                .get_mut("metadata")
                .and_then(Value::as_object_mut)
                .ok_or_else(|| {
                    Error::Ownership(format!("{} {} 缺少 metadata", resource.kind, resource.name))
                })?;
            metadata.insert("ownerReferences".to_string(), Value::Array(vec![owner.clone()]));
        }
        Ok(())
    }
}

/// 对单个对象的操作
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create { name: String },
    Update { name: String, previous: Value, desired: Value },
    Delete { name: String },
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Create { name } | Operation::Update { name, .. } | Operation::Delete { name } => name,
        }
    }
}

/// 计算某一类型的差异：先删除，再创建，最后更新
pub fn diff(previous: &Resources, latest: &Resources, kind: ResourceKind) -> Vec<Operation> {
    let mut deletes = Vec::new();
    let mut creates = Vec::new();
    let mut updates = Vec::new();

    for old in previous.of_kind(kind) {
        if latest.get(kind, &old.name).is_none() {
            deletes.push(Operation::Delete { name: old.name.clone() });
        }
    }
    for new in latest.of_kind(kind) {
        match previous.get(kind, &new.name) {
            None => creates.push(Operation::Create { name: new.name.clone() }),
            Some(old) if old.spec != new.spec => updates.push(Operation::Update {
                name: new.name.clone(),
                previous: old.spec.clone(),
                desired: new.spec.clone(),
            }),
            Some(_) => {}
        }
    }

    deletes.into_iter().chain(creates).chain(updates).collect()
}

/// 按派发顺序计算全部类型的差异
pub fn diff_all(previous: &Resources, latest: &Resources) -> Vec<(ResourceKind, Vec<Operation>)> {
    if previous.is_empty() && latest.is_empty() {
        return Vec::new();
    }
    ResourceKind::ALL
        .iter()
        .map(|kind| (*kind, diff(previous, latest, *kind)))
        .filter(|(_, ops)| !ops.is_empty())
        .collect()
}
