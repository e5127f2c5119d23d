//! Coherence 自定义资源
//!
//! `Coherence` 描述一组完全相同的 Coherence 成员 Pod 的期望状态。
//! 所有可选字段都用 `Option` 表示，从而区分"未设置"与显式的零值/false，
//! 合并规则依赖这一点：未设置的字段继承默认值，显式设置的值覆盖默认值。

use k8s_openapi::api::core::v1::{
    Affinity, EmptyDirVolumeSource, EnvVar, ExecAction, HTTPGetAction, HostAlias, HostPathVolumeSource,
    LocalObjectReference, NFSVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodDNSConfig, PodSecurityContext, ResourceRequirements,
    SecurityContext, TCPSocketAction, Toleration, Volume, VolumeMount,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::constants::*;
use super::status::CoherenceStatus;

/// Coherence 部署规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "coherence.oracle.com",
    version = "v1",
    kind = "Coherence",
    namespaced,
    shortname = "coh"
)]
#[kube(status = "CoherenceStatus")]
#[kube(
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#
)]
#[kube(printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".status.coherenceCluster"}"#)]
#[kube(printcolumn = r#"{"name":"Role", "type":"string", "jsonPath":".status.role"}"#)]
#[kube(printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".status.replicas"}"#)]
#[kube(printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#)]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceResourceSpec {
    /// 所属 Coherence 集群名，未设置时使用部署名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// 角色名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// 副本数，未设置时默认为 3；显式的 0 表示停止
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Coherence 镜像
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    /// Coherence 工具镜像
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_utils: Option<ImageSpec>,
    /// 用户应用镜像，以 init 容器的方式加入 Pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<CoherenceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm: Option<JvmSpec>,
    /// 额外的命名端口，以及为这些端口创建的 Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<NamedPortSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    /// 健康检查端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ReadinessProbeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ScalingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Pod 注解
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Pod 额外标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_templates: Option<Vec<PersistentVolumeClaim>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    /// Pod 级安全上下文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    /// Coherence 容器的安全上下文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_process_namespace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ipc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// 镜像规范
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

/// 用户应用规范
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// 应用文件所在目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<String>,
    /// 主类
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// 主类参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Coherence 相关设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_enabled: Option<bool>,
    /// Coherence 日志级别（0-9）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,
    /// 为 true 时该部署的 Pod 不作为 WKA 成员
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_from_wka: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistentStorageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PersistentStorageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<PortToggleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PortToggleSpec>,
}

/// 持久化存储：PVC 模板或普通卷，二选一
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentStorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<StorageVolumeSpec>,
}

/// 持久化使用的普通卷来源
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageVolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NFSVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
}

impl StorageVolumeSpec {
    /// 以给定卷名生成 Pod 卷
    pub fn to_volume(&self, name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            host_path: self.host_path.clone(),
            empty_dir: self.empty_dir.clone(),
            nfs: self.nfs.clone(),
            persistent_volume_claim: self.persistent_volume_claim.clone(),
            ..Default::default()
        }
    }
}

/// 可开关的端口（管理、指标）
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortToggleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// 日志配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSpec {
    /// 日志配置文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    /// 包含日志配置的 ConfigMap 名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd: Option<FluentdSpec>,
}

/// Fluentd 日志采集边车
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FluentdSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// 日志标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// JVM 设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JvmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmxmp: Option<PortToggleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_container_limits: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc: Option<JvmGarbageCollectorSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JvmGarbageCollectorSpec {
    /// G1、CMS 或 Parallel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
}

/// 命名端口
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamedPortSpec {
    pub name: String,
    /// 容器端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(rename = "hostIP", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<PortServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<ServiceMonitorSpec>,
}

/// 端口对应 Service 的设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Service 端口，默认与容器端口相同
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Prometheus ServiceMonitor 设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// 探针设置，处理器优先级为 exec > httpGet > tcpSocket > 默认
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProbeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HTTPGetAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TCPSocketAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

/// 扩缩容策略
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ScalingPolicy {
    ParallelUpSafeDownScaling,
    ParallelScaling,
    SafeScaling,
}

impl ScalingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingPolicy::ParallelUpSafeDownScaling => "ParallelUpSafeDownScaling",
            ScalingPolicy::ParallelScaling => "ParallelScaling",
            ScalingPolicy::SafeScaling => "SafeScaling",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ScalingPolicy>,
}

/// Pod 网络设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_aliases: Option<Vec<HostAlias>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl CoherenceResourceSpec {
    /// 期望副本数，未设置时返回默认值
    pub fn get_replicas(&self) -> i32 {
        self.replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    /// 角色名，未设置时返回默认角色名
    pub fn get_role_name(&self) -> &str {
        match self.role.as_deref() {
            Some(role) if !role.is_empty() => role,
            _ => DEFAULT_ROLE_NAME,
        }
    }

    pub fn get_health_port(&self) -> i32 {
        match self.health_port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_HEALTH_PORT,
        }
    }

    /// 是否作为 WKA 成员
    pub fn is_wka_member(&self) -> bool {
        !self
            .coherence
            .as_ref()
            .and_then(|c| c.exclude_from_wka)
            .unwrap_or(false)
    }

    /// 扩缩容策略：未设置时存储节点使用安全缩容，非存储节点并行扩缩
    pub fn get_scaling_policy(&self) -> ScalingPolicy {
        if let Some(policy) = self.scaling.as_ref().and_then(|s| s.policy) {
            return policy;
        }
        let storage = self
            .coherence
            .as_ref()
            .and_then(|c| c.storage_enabled)
            .unwrap_or(true);
        if storage {
            ScalingPolicy::ParallelUpSafeDownScaling
        } else {
            ScalingPolicy::ParallelScaling
        }
    }
}

impl Coherence {
    /// Coherence 集群名，未设置时为部署名
    pub fn cluster_name(&self) -> String {
        match self.spec.cluster.as_deref() {
            Some(cluster) if !cluster.is_empty() => cluster.to_string(),
            _ => self.name_any(),
        }
    }

    /// WKA 服务名
    pub fn wka_service_name(&self) -> String {
        format!("{}{}", self.cluster_name(), WKA_SERVICE_SUFFIX)
    }

    /// 是否由本部署负责创建 WKA 服务
    ///
    /// 独立部署（未设置集群名，或集群名等于部署名）自己创建；
    /// 加入其他集群的部署由集群的拥有者负责。
    pub fn owns_wka_service(&self) -> bool {
        self.cluster_name() == self.name_any()
    }

    /// 状态存储 ConfigMap 名
    pub fn storage_name(&self) -> String {
        format!("{}{}", self.name_any(), STORAGE_SUFFIX)
    }

    /// 部署是否正在删除
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// 状态中使用的标签选择器
    pub fn status_selector(&self) -> String {
        format!(
            "{}={},{}={}",
            LABEL_COHERENCE_CLUSTER,
            self.cluster_name(),
            LABEL_COHERENCE_DEPLOYMENT,
            self.name_any()
        )
    }
}
