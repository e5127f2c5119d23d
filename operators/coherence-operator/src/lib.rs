//! Coherence Operator - 在 Kubernetes 上管理 Oracle Coherence 集群
//!
//! 该模块把声明式的 `Coherence` / `CoherenceCluster` 自定义资源展开为
//! StatefulSet、Service、ConfigMap、Secret 和可选的 ServiceMonitor，
//! 并通过协调循环让实际状态持续收敛到期望状态。

pub mod client;
pub mod cluster_reconcile;
pub mod controller;
pub mod crd;
pub mod error;
pub mod flags;
pub mod lock;
pub mod merge;
pub mod operator_secret;
pub mod patch;
pub mod reconcile;
pub mod reconciler;
pub mod resources;
pub mod storage;
pub mod templates;
pub mod topology;

use anyhow::{Context, Result};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::client::{KubeClient, KubeOps};
use crate::cluster_reconcile::ClusterReconciler;
use crate::flags::OperatorFlags;
use crate::reconcile::Reconciler;
use crate::topology::TopologyServer;

/// Operator 主结构体
pub struct CoherenceOperator {
    client: Client,
    flags: Arc<OperatorFlags>,
    ops: Arc<dyn KubeOps>,
}

impl CoherenceOperator {
    /// 创建新的 Operator 实例
    pub async fn new(flags: OperatorFlags) -> Result<Self> {
        let client = Client::try_default().await.context("创建 Kubernetes 客户端失败")?;
        let ops: Arc<dyn KubeOps> = Arc::new(KubeClient::new(client.clone()));
        Ok(Self {
            client,
            flags: Arc::new(flags),
            ops,
        })
    }

    /// 启动拓扑服务和控制器，直到收到退出信号
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.flags.rest_host, self.flags.rest_port)
            .parse()
            .with_context(|| format!("无效的 ReST 地址 {}:{}", self.flags.rest_host, self.flags.rest_port))?;
        TopologyServer::new(self.ops.clone(), &self.flags).start(addr)?;

        let operator_host = operator_secret::operator_host(&self.flags, coherence_common::net::local_address)
            .context("无法确定 Operator 地址")?;
        let monitoring = controller::monitoring_available(&self.client).await?;
        info!(operator_host = %operator_host, monitoring, "Operator 初始化完成");

        let reconciler = Arc::new(Reconciler::new(
            self.ops.clone(),
            self.flags.clone(),
            operator_host,
            monitoring,
        ));
        let cluster_reconciler = Arc::new(ClusterReconciler::new(self.ops.clone(), self.flags.clone()));

        controller::Controller::new(self.client, self.flags, reconciler, cluster_reconciler)
            .run()
            .await
    }
}
