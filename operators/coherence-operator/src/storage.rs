//! 期望状态存储
//!
//! 每个部署在同一命名空间中有一个 `<name>-storage` ConfigMap，
//! `previous` 保存上一次成功写入的期望集合，`latest` 保存本次计算的期望集合。
//! 两个键在同一次写入中更新。

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource as _, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::KubeOps;
use crate::crd::constants::{
    ANNOTATION_STORAGE_VERSION, COMPONENT_STORAGE, LABEL_COHERENCE_CLUSTER, LABEL_COHERENCE_DEPLOYMENT,
    LABEL_COMPONENT,
};
use crate::crd::Coherence;
use crate::error::{Error, Result};
use crate::resources::{ResourceKind, Resources};

/// 上一次的期望集合
pub const KEY_PREVIOUS: &str = "previous";
/// 本次的期望集合
pub const KEY_LATEST: &str = "latest";
/// 存储格式版本
pub const STORAGE_VERSION: &str = "1";

/// 存储记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreRecord {
    pub previous: Resources,
    pub latest: Resources,
}

/// 基于 ConfigMap 的状态存储
#[derive(Clone)]
pub struct StateStore {
    client: Arc<dyn KubeOps>,
}

impl StateStore {
    pub fn new(client: Arc<dyn KubeOps>) -> Self {
        Self { client }
    }

    /// 读取存储记录，首次调用时两侧都为空
    pub async fn load(&self, namespace: &str, name: &str) -> Result<StoreRecord> {
        let storage = storage_name(name);
        let object = self
            .client
            .get(ResourceKind::ConfigMap, namespace, &storage)
            .await
            .map_err(|e| Error::Store(format!("读取 {}/{} 失败: {}", namespace, storage, e)))?;

        match object {
            None => Ok(StoreRecord::default()),
            Some(object) => {
                let cm: ConfigMap = serde_json::from_value(object)
                    .map_err(|e| Error::Store(format!("{}/{} 格式错误: {}", namespace, storage, e)))?;
                let data = cm.data.unwrap_or_default();
                Ok(StoreRecord {
                    previous: decode(&data, KEY_PREVIOUS)?,
                    latest: decode(&data, KEY_LATEST)?,
                })
            }
        }
    }

    pub async fn get_latest(&self, namespace: &str, name: &str) -> Result<Resources> {
        Ok(self.load(namespace, name).await?.latest)
    }

    pub async fn get_previous(&self, namespace: &str, name: &str) -> Result<Resources> {
        Ok(self.load(namespace, name).await?.previous)
    }

    /// 把当前 latest 移到 previous，写入新的 latest
    pub async fn store(&self, owner: &Coherence, set: &Resources) -> Result<StoreRecord> {
        let namespace = owner.namespace().unwrap_or_default();
        let name = owner.name_any();
        let current = self.load(&namespace, &name).await?;

        let record = StoreRecord {
            previous: current.latest.clone(),
            latest: set.clone(),
        };
        if record == current {
            debug!(namespace = %namespace, name = %name, "期望状态未变化，跳过存储写入");
            return Ok(record);
        }

        let exists = !current.previous.is_empty() || !current.latest.is_empty();
        self.write(owner, &record, exists).await?;

        info!(namespace = %namespace, name = %name, objects = set.len(), "期望状态已存储");
        Ok(record)
    }

    /// 派发失败时写回原记录，下一次协调重新计算同样的操作
    pub async fn restore(&self, owner: &Coherence, record: &StoreRecord) -> Result<()> {
        self.write(owner, record, false).await?;
        info!(namespace = ?owner.namespace(), name = %owner.name_any(), "期望状态已回滚");
        Ok(())
    }

    async fn write(&self, owner: &Coherence, record: &StoreRecord, known_to_exist: bool) -> Result<()> {
        let namespace = owner.namespace().unwrap_or_default();
        let storage = storage_name(&owner.name_any());
        let object = self.config_map(owner, record)?;
        let exists = known_to_exist || self.exists(&namespace, &storage).await?;
        let result = if exists {
            self.client
                .replace(ResourceKind::ConfigMap, &namespace, &storage, &object)
                .await
        } else {
            self.client.create(ResourceKind::ConfigMap, &namespace, &object).await
        };
        result.map_err(|e| Error::Store(format!("写入 {}/{} 失败: {}", namespace, storage, e)))
    }

    /// 部署删除时清理存储
    pub async fn clear(&self, namespace: &str, name: &str) -> Result<()> {
        let storage = storage_name(name);
        self.client
            .delete(ResourceKind::ConfigMap, namespace, &storage)
            .await
            .map_err(|e| Error::Store(format!("删除 {}/{} 失败: {}", namespace, storage, e)))
    }

    async fn exists(&self, namespace: &str, storage: &str) -> Result<bool> {
        self.client
            .get(ResourceKind::ConfigMap, namespace, storage)
            .await
            .map(|o| o.is_some())
            .map_err(|e| Error::Store(format!("读取 {}/{} 失败: {}", namespace, storage, e)))
    }

    fn config_map(&self, owner: &Coherence, record: &StoreRecord) -> Result<Value> {
        let mut data = BTreeMap::new();
        data.insert(KEY_PREVIOUS.to_string(), encode(&record.previous)?);
        data.insert(KEY_LATEST.to_string(), encode(&record.latest)?);

        let labels = BTreeMap::from([
            (LABEL_COHERENCE_CLUSTER.to_string(), owner.cluster_name()),
            (LABEL_COHERENCE_DEPLOYMENT.to_string(), owner.name_any()),
            (LABEL_COMPONENT.to_string(), COMPONENT_STORAGE.to_string()),
        ]);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(storage_name(&owner.name_any())),
                namespace: owner.namespace(),
                labels: Some(labels),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_STORAGE_VERSION.to_string(),
                    STORAGE_VERSION.to_string(),
                )])),
                owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        serde_json::to_value(&cm).map_err(|e| Error::Store(e.to_string()))
    }
}

/// 存储 ConfigMap 名
pub fn storage_name(name: &str) -> String {
    format!("{}{}", name, crate::crd::constants::STORAGE_SUFFIX)
}

fn encode(set: &Resources) -> Result<String> {
    serde_json::to_string(set).map_err(|e| Error::Store(format!("序列化期望状态失败: {}", e)))
}

fn decode(data: &BTreeMap<String, String>, key: &str) -> Result<Resources> {
    match data.get(key) {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str(raw).map_err(|e| Error::Store(format!("解析 {} 失败: {}", key, e)))
        }
        _ => Ok(Resources::new()),
    }
}
