//! 控制器模块
//!
//! 把部署协调器和集群协调器挂到 kube 运行时上：
//! `Coherence` 控制器拥有 StatefulSet、Service 和 ConfigMap，
//! `CoherenceCluster` 控制器拥有子 `Coherence`。

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    api::Api,
    client::Client,
    runtime::{controller::Controller as KubeController, watcher},
    Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cluster_reconcile::ClusterReconciler;
use crate::crd::{Coherence, CoherenceCluster};
use crate::flags::OperatorFlags;
use crate::reconcile::Reconciler;
use crate::templates::monitoring;

/// 控制器
pub struct Controller {
    client: Client,
    flags: Arc<OperatorFlags>,
    reconciler: Arc<Reconciler>,
    cluster_reconciler: Arc<ClusterReconciler>,
}

impl Controller {
    pub fn new(
        client: Client,
        flags: Arc<OperatorFlags>,
        reconciler: Arc<Reconciler>,
        cluster_reconciler: Arc<ClusterReconciler>,
    ) -> Self {
        Self {
            client,
            flags,
            reconciler,
            cluster_reconciler,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match &self.flags.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// 运行两个控制器，直到收到退出信号
    pub async fn run(self) -> Result<()> {
        let reconciler = self.reconciler.clone();
        let deployments = KubeController::new(self.api::<Coherence>(), watcher::Config::default())
            .owns(self.api::<StatefulSet>(), watcher::Config::default())
            .owns(self.api::<Service>(), watcher::Config::default())
            .owns(self.api::<ConfigMap>(), watcher::Config::default())
            .shutdown_on_signal()
            .run(
                |coherence, reconciler: Arc<Reconciler>| async move { reconciler.reconcile_object(coherence).await },
                |coherence, error, reconciler| reconciler.handle_error(coherence, error),
                reconciler,
            )
            .for_each(|result| async {
                match result {
                    Ok(o) => debug!("部署协调成功: {:?}", o),
                    Err(e) => error!("部署协调错误: {}", e),
                }
            });

        let cluster_reconciler = self.cluster_reconciler.clone();
        let clusters = KubeController::new(self.api::<CoherenceCluster>(), watcher::Config::default())
            .owns(self.api::<Coherence>(), watcher::Config::default())
            .shutdown_on_signal()
            .run(
                |cluster, reconciler: Arc<ClusterReconciler>| async move { reconciler.reconcile_object(cluster).await },
                |cluster, error, reconciler| reconciler.handle_error(cluster, error),
                cluster_reconciler,
            )
            .for_each(|result| async {
                match result {
                    Ok(o) => debug!("集群协调成功: {:?}", o),
                    Err(e) => error!("集群协调错误: {}", e),
                }
            });

        info!(namespace = ?self.flags.watch_namespace, "启动 Coherence 控制器");
        tokio::join!(deployments, clusters);
        info!("Coherence 控制器已停止");
        Ok(())
    }
}

/// ServiceMonitor 所在的 API 组是否已安装
pub async fn monitoring_available(client: &Client) -> Result<bool> {
    let group = monitoring::API_VERSION
        .split_once('/')
        .map(|(group, _)| group)
        .context("ServiceMonitor apiVersion 格式错误")?;
    match kube::discovery::group(client, group).await {
        Ok(api_group) => Ok(api_group.recommended_kind(monitoring::KIND).is_some()),
        Err(e) => {
            debug!(group, error = %e, "未发现监控 API 组");
            Ok(false)
        }
    }
}
