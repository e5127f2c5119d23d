//! 部署协调模块
//!
//! 对一个 `(namespace, name)` 请求，把 Coherence 部署驱动到声明的状态：
//! 加锁、读取、初始化状态、补全副本数、确保配置 Secret、
//! 合成期望集合、计算差异、持久化，最后按固定顺序派发给子协调器。

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::client::{EventRecord, KubeOps};
use crate::crd::constants::DEFAULT_REPLICAS;
use crate::crd::status::status_of;
use crate::crd::{Coherence, Phase};
use crate::error::{Error, Result};
use crate::flags::OperatorFlags;
use crate::lock::{lock_key, LockRegistry};
use crate::operator_secret::ensure_operator_secret;
use crate::reconciler::statefulset::StatefulSetReconciler;
use crate::reconciler::{Outcome, SubReconciler};
use crate::resources::{diff_all, Operation, ResourceKind, Resources};
use crate::storage::StateStore;
use crate::templates::synthesize;

/// 另一个协调正在处理同一部署时的重新入队间隔
pub const LOCKED_REQUEUE: Duration = Duration::ZERO;

/// 协调器统计
#[derive(Default, Debug, Clone)]
pub struct ReconcilerState {
    /// 已处理的协调请求数
    pub reconciles: usize,
    /// 失败次数
    pub failures: usize,
    /// 上次协调时间
    pub last_reconcile_time: Option<chrono::DateTime<Utc>>,
}

/// 部署协调器
pub struct Reconciler {
    client: Arc<dyn KubeOps>,
    store: StateStore,
    flags: Arc<OperatorFlags>,
    locks: LockRegistry,
    /// 写入配置 Secret 的 `host:port`
    operator_host: String,
    /// ServiceMonitor CRD 是否已安装
    monitoring_available: bool,
    state: Arc<RwLock<ReconcilerState>>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn KubeOps>,
        flags: Arc<OperatorFlags>,
        operator_host: String,
        monitoring_available: bool,
    ) -> Self {
        Self {
            store: StateStore::new(client.clone()),
            client,
            flags,
            locks: LockRegistry::global(),
            operator_host,
            monitoring_available,
            state: Arc::new(RwLock::new(ReconcilerState::default())),
        }
    }

    /// 使用独立的锁表，测试中避免与其他用例共享全局状态
    pub fn with_locks(mut self, locks: LockRegistry) -> Self {
        self.locks = locks;
        self
    }

    /// 控制器入口
    pub async fn reconcile_object(&self, coherence: Arc<Coherence>) -> Result<Action> {
        let namespace = coherence.namespace().unwrap_or_default();
        let name = coherence.name_any();
        Ok(self.reconcile(&namespace, &name).await?.into_action())
    }

    /// 协调一个部署
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        {
            let mut state = self.state.write().await;
            state.reconciles += 1;
            state.last_reconcile_time = Some(Utc::now());
        }

        // 1. 互斥
        let key = lock_key(namespace, name);
        let Some(_guard) = self.locks.try_lock(&key) else {
            debug!(namespace, name, "部署正在被其他协调处理，稍后重试");
            return Ok(Outcome::Requeue(LOCKED_REQUEUE));
        };

        // 2. 读取
        let Some(mut deployment) = self.client.get_coherence(namespace, name).await? else {
            debug!(namespace, name, "部署不存在，视为已删除");
            return Ok(Outcome::Done);
        };
        if deployment.is_being_deleted() {
            info!(namespace, name, "部署正在删除，清理状态存储");
            self.store.clear(namespace, name).await?;
            return Ok(Outcome::Done);
        }

        info!(namespace, name, "协调 Coherence 部署");

        // 3. 初始化状态
        if deployment.status.as_ref().and_then(|s| s.phase).is_none() {
            let mut status = status_of(&deployment);
            status.ensure_initialized(&deployment, Utc::now());
            self.client.patch_coherence_status(namespace, name, &status).await?;
            deployment.status = Some(status);
        }

        // 4. 补全副本数：只处理未设置的情况，显式的 0 表示停止
        if deployment.spec.replicas.is_none() {
            let patch = json!({ "replicas": DEFAULT_REPLICAS });
            if let Err(e) = self.client.patch_coherence_spec(namespace, name, &patch).await {
                return self.fail_with_status(&deployment, e).await;
            }
            info!(namespace, name, replicas = DEFAULT_REPLICAS, "已补全默认副本数");
            deployment.spec.replicas = Some(DEFAULT_REPLICAS);
        }

        // 5. 配置 Secret
        if let Err(e) = ensure_operator_secret(self.client.as_ref(), namespace, &self.operator_host).await {
            return self.fail_with_status(&deployment, e).await;
        }

        // 6 - 11
        match self.apply(&deployment).await {
            Ok(outcome) => {
                self.clear_failure(&deployment).await;
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(&deployment, &e).await;
                let repeated = status_of(&deployment).failed_with(e.reason());
                let fail_phase = e.is_fatal() || (matches!(e, Error::Merge(_)) && repeated);
                self.surface_failure(&deployment, &e, fail_phase).await;
                Err(e)
            }
        }
    }

    /// 合成、比较、持久化并派发；派发失败时回滚存储记录
    async fn apply(&self, deployment: &Coherence) -> Result<Outcome> {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();

        let record = self.store.load(&namespace, &name).await?;

        let mut latest = synthesize(deployment, &self.flags, self.monitoring_available)?;
        let owner = deployment
            .controller_owner_ref(&())
            .ok_or_else(|| Error::Ownership(format!("部署 {}/{} 缺少 uid", namespace, name)))?;
        latest.set_owner(&owner)?;

        let operations = diff_all(&record.latest, &latest);
        if operations.is_empty() {
            debug!(namespace = %namespace, name = %name, "期望状态没有变化");
        }

        let written = self.store.store(deployment, &latest).await?;

        match self.dispatch(deployment, &operations, &latest).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if written != record {
                    if let Err(err) = self.store.restore(deployment, &record).await {
                        warn!(namespace = %namespace, name = %name, error = %err, "回滚期望状态失败");
                    }
                }
                Err(e)
            }
        }
    }

    /// 按固定顺序调用子协调器，合并各自的重新入队请求
    async fn dispatch(
        &self,
        deployment: &Coherence,
        operations: &[(ResourceKind, Vec<Operation>)],
        latest: &Resources,
    ) -> Result<Outcome> {
        let patch_type = self.flags.patch_type();
        let mut outcome = Outcome::Done;
        for kind in ResourceKind::ALL {
            let ops: &[Operation] = operations
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, ops)| ops.as_slice())
                .unwrap_or(&[]);

            let result = if kind == ResourceKind::StatefulSet {
                StatefulSetReconciler::new(self.client.clone(), patch_type)
                    .reconcile(deployment, ops, latest, Utc::now())
                    .await?
            } else if ops.is_empty() {
                continue;
            } else {
                SubReconciler::new(self.client.clone(), kind, patch_type)
                    .reconcile(deployment, ops, latest)
                    .await?
            };
            outcome = outcome.or(result);
        }

        Ok(outcome)
    }

    /// 设置 Failed 状态后重新入队
    async fn fail_with_status(&self, deployment: &Coherence, e: Error) -> Result<Outcome> {
        warn!(namespace = ?deployment.namespace(), name = %deployment.name_any(), error = %e, "协调失败");
        self.surface_failure(deployment, &e, true).await;
        Err(e)
    }

    /// 写入 Failed 条件，保留之前的条件；`fail_phase` 时相位也切到 Failed
    async fn surface_failure(&self, deployment: &Coherence, e: &Error, fail_phase: bool) {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        let now = Utc::now();
        let mut status = status_of(deployment);
        if fail_phase {
            status.set_phase_with_message(Phase::Failed, Some(e.to_string()), now);
        }
        status.record_failure(e.reason(), e.to_string(), now);
        if let Err(err) = self.client.patch_coherence_status(&namespace, &name, &status).await {
            warn!(namespace = %namespace, name = %name, error = %err, "更新 Failed 状态失败");
        }
    }

    /// 协调成功后撤销上一次留下的 Failed 条件
    async fn clear_failure(&self, deployment: &Coherence) {
        if !status_of(deployment).failed_with_any() {
            return;
        }
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        // 子协调器可能已经更新过状态，重新读取后再修改
        let current = match self.client.get_coherence(&namespace, &name).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                warn!(namespace = %namespace, name = %name, error = %err, "读取部署失败");
                return;
            }
        };
        let mut status = status_of(&current);
        if status.clear_failure(Utc::now()) {
            if let Err(err) = self.client.patch_coherence_status(&namespace, &name, &status).await {
                warn!(namespace = %namespace, name = %name, error = %err, "清除 Failed 条件失败");
            }
        }
    }

    async fn record_failure(&self, deployment: &Coherence, e: &Error) {
        self.state.write().await.failures += 1;
        let event = EventRecord::normal("Failed", "Reconcile", format!("{}: {}", e.reason(), e));
        self.client.publish_event(&deployment.object_ref(&()), &event).await;
    }

    /// 错误处理策略
    pub fn handle_error(&self, coherence: Arc<Coherence>, error: &Error) -> Action {
        error!(
            namespace = ?coherence.namespace(),
            name = %coherence.name_any(),
            reason = error.reason(),
            "协调部署失败: {}",
            error
        );
        match error.requeue() {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        }
    }

    /// 获取协调器统计
    pub async fn get_state(&self) -> ReconcilerState {
        self.state.read().await.clone()
    }
}
