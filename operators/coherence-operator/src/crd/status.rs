//! 部署状态与状态条件
//!
//! 相位转换：
//! Initialized -> Created -> {Ready <-> Scaling <-> RollingUpgrade} -> Stopped，
//! Failed 可以从任意相位进入。

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::StatefulSetStatus;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::coherence::Coherence;

/// 部署相位，同时也是状态条件的类型
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    Initialized,
    Created,
    Ready,
    Scaling,
    RollingUpgrade,
    Stopped,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Initialized => "Initialized",
            Phase::Created => "Created",
            Phase::Ready => "Ready",
            Phase::Scaling => "Scaling",
            Phase::RollingUpgrade => "RollingUpgrade",
            Phase::Stopped => "Stopped",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// 状态条件
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: Phase,
    /// "True" 或 "False"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Coherence 部署状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_cluster: Option<String>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl CoherenceStatus {
    /// 获取指定类型的条件
    pub fn condition(&self, type_: Phase) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// 设置条件，同类型的旧条件被替换；状态未变化时保留原转换时间
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// 切换相位，返回状态是否发生变化
    pub fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>) -> bool {
        self.set_phase_with_message(phase, None, now)
    }

    /// 切换相位并附带消息
    pub fn set_phase_with_message(
        &mut self,
        phase: Phase,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.phase == Some(phase) && message.is_none() {
            return false;
        }

        if let Some(previous) = self.phase {
            let leaving = matches!(
                previous,
                Phase::Ready | Phase::Scaling | Phase::RollingUpgrade | Phase::Stopped
            );
            if leaving && previous != phase {
                self.set_condition(Condition {
                    type_: previous,
                    status: "False".to_string(),
                    last_transition_time: Some(now),
                    reason: None,
                    message: None,
                });
            }
        }

        self.phase = Some(phase);
        self.set_condition(Condition {
            type_: phase,
            status: "True".to_string(),
            last_transition_time: Some(now),
            reason: None,
            message,
        });
        true
    }

    /// 确保初始状态字段和 Initialized 条件存在
    pub fn ensure_initialized(&mut self, deployment: &Coherence, now: DateTime<Utc>) -> bool {
        let mut updated = false;

        let replicas = deployment.spec.get_replicas();
        if self.replicas != replicas {
            self.replicas = replicas;
            updated = true;
        }

        let cluster = deployment.cluster_name();
        if self.coherence_cluster.as_deref() != Some(cluster.as_str()) {
            self.coherence_cluster = Some(cluster);
            updated = true;
        }

        if self.phase.is_none() {
            updated = self.set_phase(Phase::Initialized, now) || updated;
        }

        if self.selector.is_none() {
            self.selector = Some(deployment.status_selector());
            updated = true;
        }

        let role = deployment.spec.get_role_name();
        if self.role.as_deref() != Some(role) {
            self.role = Some(role.to_string());
            updated = true;
        }

        updated
    }

    /// 根据 StatefulSet 的观测状态更新相位
    pub fn update_from_statefulset(
        &mut self,
        deployment: &Coherence,
        sts: Option<&StatefulSetStatus>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut updated = self.ensure_initialized(deployment, now);

        match sts {
            Some(sts) => {
                let current = sts.current_replicas.unwrap_or(0);
                let ready = sts.ready_replicas.unwrap_or(0);
                if self.current_replicas != current {
                    self.current_replicas = current;
                    updated = true;
                }
                if self.ready_replicas != ready {
                    self.ready_replicas = ready;
                    updated = true;
                }

                if sts.current_revision == sts.update_revision {
                    if self.phase != Some(Phase::Ready)
                        && self.replicas == self.ready_replicas
                        && self.replicas == self.current_replicas
                    {
                        updated = self.set_phase(Phase::Ready, now) || updated;
                    }
                } else if self.phase != Some(Phase::RollingUpgrade) {
                    updated = self.set_phase(Phase::RollingUpgrade, now) || updated;
                }
            }
            None => {
                if self.current_replicas != 0 {
                    self.current_replicas = 0;
                    updated = true;
                }
                if self.ready_replicas != 0 {
                    self.ready_replicas = 0;
                    updated = true;
                }
            }
        }

        if deployment.spec.get_replicas() == 0 && self.phase != Some(Phase::Stopped) {
            updated = self.set_phase(Phase::Stopped, now) || updated;
        }

        updated
    }

    /// 记录一次协调失败：Failed 条件置为 True 并带上原因，相位不变
    pub fn record_failure(&mut self, reason: &str, message: String, now: DateTime<Utc>) {
        self.set_condition(Condition {
            type_: Phase::Failed,
            status: "True".to_string(),
            last_transition_time: Some(now),
            reason: Some(reason.to_string()),
            message: Some(message),
        });
    }

    /// 上一次协调是否因同一原因失败
    pub fn failed_with(&self, reason: &str) -> bool {
        self.condition(Phase::Failed)
            .map_or(false, |c| c.status == "True" && c.reason.as_deref() == Some(reason))
    }

    /// 是否留有未撤销的 Failed 条件
    pub fn failed_with_any(&self) -> bool {
        self.condition(Phase::Failed).map_or(false, |c| c.status == "True")
    }

    /// 协调成功后把 Failed 条件置为 False，返回状态是否发生变化
    pub fn clear_failure(&mut self, now: DateTime<Utc>) -> bool {
        match self.condition(Phase::Failed) {
            Some(c) if c.status == "True" => {
                let reason = c.reason.clone();
                self.set_condition(Condition {
                    type_: Phase::Failed,
                    status: "False".to_string(),
                    last_transition_time: Some(now),
                    reason,
                    message: None,
                });
                true
            }
            _ => false,
        }
    }

    /// 是否所有副本都已就绪
    pub fn is_ready(&self) -> bool {
        self.phase == Some(Phase::Ready)
    }
}

/// 从部署中取出当前状态的副本，用于修改后写回
pub fn status_of(deployment: &Coherence) -> CoherenceStatus {
    deployment.status.clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CoherenceResourceSpec;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn deployment(replicas: Option<i32>) -> Coherence {
        Coherence::new(
            "test",
            CoherenceResourceSpec {
                replicas,
                ..Default::default()
            },
        )
    }

    fn sts_status(replicas: i32, ready: i32, current: &str, update: &str) -> StatefulSetStatus {
        StatefulSetStatus {
            replicas,
            current_replicas: Some(replicas),
            ready_replicas: Some(ready),
            current_revision: Some(current.to_string()),
            update_revision: Some(update.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_ensure_initialized() {
        let coh = deployment(None);
        let mut status = CoherenceStatus::default();
        assert!(status.ensure_initialized(&coh, now()));
        assert_eq!(status.phase, Some(Phase::Initialized));
        assert_eq!(status.replicas, 3);
        assert_eq!(status.coherence_cluster.as_deref(), Some("test"));
        assert_eq!(
            status.selector.as_deref(),
            Some("coherenceCluster=test,coherenceDeployment=test")
        );
        assert_eq!(status.role.as_deref(), Some("storage"));
        assert!(!status.ensure_initialized(&coh, now()));
    }

    #[test]
    fn test_leaving_ready_marks_condition_false() {
        let mut status = CoherenceStatus::default();
        status.set_phase(Phase::Ready, now());
        status.set_phase(Phase::Scaling, now());

        assert_eq!(status.phase, Some(Phase::Scaling));
        assert_eq!(status.condition(Phase::Ready).unwrap().status, "False");
        assert_eq!(status.condition(Phase::Scaling).unwrap().status, "True");
        assert_eq!(
            status.conditions.iter().filter(|c| c.type_ == Phase::Ready).count(),
            1
        );
    }

    #[test]
    fn test_set_same_phase_is_noop() {
        let mut status = CoherenceStatus::default();
        assert!(status.set_phase(Phase::Created, now()));
        assert!(!status.set_phase(Phase::Created, now()));
    }

    #[test]
    fn test_failed_keeps_earlier_conditions() {
        let mut status = CoherenceStatus::default();
        status.set_phase(Phase::Initialized, now());
        status.set_phase(Phase::Created, now());
        status.set_phase_with_message(Phase::Failed, Some("boom".into()), now());

        assert_eq!(status.phase, Some(Phase::Failed));
        assert!(status.condition(Phase::Initialized).is_some());
        assert!(status.condition(Phase::Created).is_some());
        assert_eq!(
            status.condition(Phase::Failed).unwrap().message.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_failure_condition_lifecycle() {
        let mut status = CoherenceStatus::default();
        status.set_phase(Phase::Initialized, now());
        assert!(!status.failed_with("MergeError"));

        status.record_failure("MergeError", "bad patch".into(), now());
        assert_eq!(status.phase, Some(Phase::Initialized));
        assert!(status.failed_with("MergeError"));
        assert!(!status.failed_with("StoreError"));

        assert!(status.failed_with_any());
        assert!(status.clear_failure(now()));
        assert!(!status.failed_with_any());
        assert!(!status.failed_with("MergeError"));
        assert_eq!(status.condition(Phase::Failed).unwrap().status, "False");
        assert!(status.condition(Phase::Initialized).is_some());
        assert!(!status.clear_failure(now()));
    }

    #[test]
    fn test_statefulset_ready() {
        let coh = deployment(Some(3));
        let mut status = CoherenceStatus::default();
        status.update_from_statefulset(&coh, Some(&sts_status(3, 3, "r1", "r1")), now());
        assert_eq!(status.phase, Some(Phase::Ready));
        assert_eq!(status.ready_replicas, 3);
    }

    #[test]
    fn test_statefulset_rolling_upgrade() {
        let coh = deployment(Some(3));
        let mut status = CoherenceStatus::default();
        status.update_from_statefulset(&coh, Some(&sts_status(3, 2, "r1", "r2")), now());
        assert_eq!(status.phase, Some(Phase::RollingUpgrade));
    }

    #[test]
    fn test_scaled_to_zero_is_stopped() {
        let coh = deployment(Some(0));
        let mut status = CoherenceStatus::default();
        status.update_from_statefulset(&coh, None, now());
        assert_eq!(status.phase, Some(Phase::Stopped));
        assert_eq!(status.current_replicas, 0);
    }
}
