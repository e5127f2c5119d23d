//! 常量定义
//!
//! 标签、组件名、容器名、卷名、挂载路径、默认端口以及环境变量名。

/// 默认副本数
pub const DEFAULT_REPLICAS: i32 = 3;
/// 默认角色名
pub const DEFAULT_ROLE_NAME: &str = "storage";
/// WKA 服务名后缀
pub const WKA_SERVICE_SUFFIX: &str = "-wka";
/// 脚本 ConfigMap 名后缀
pub const SCRIPTS_CONFIG_MAP_SUFFIX: &str = "-scripts";
/// Fluentd 配置 ConfigMap 名后缀
pub const EFK_CONFIG_MAP_SUFFIX: &str = "-efk-config";
/// 状态存储 ConfigMap 名后缀
pub const STORAGE_SUFFIX: &str = "-storage";

// 标签
pub const LABEL_COHERENCE_CLUSTER: &str = "coherenceCluster";
pub const LABEL_COHERENCE_DEPLOYMENT: &str = "coherenceDeployment";
pub const LABEL_COHERENCE_ROLE: &str = "coherenceRole";
pub const LABEL_COMPONENT: &str = "coherenceComponent";
pub const LABEL_COHERENCE_PORT: &str = "coherencePort";
pub const LABEL_WKA_MEMBER: &str = "coherenceWKAMember";

// 组件名
pub const COMPONENT_POD: &str = "coherencePod";
pub const COMPONENT_STATEFULSET: &str = "coherence";
pub const COMPONENT_WKA_SERVICE: &str = "coherenceWkaService";
pub const COMPONENT_SCRIPTS: &str = "coherence-scripts";
pub const COMPONENT_EFK_CONFIG: &str = "coherence-efk-config";
pub const COMPONENT_PORT_SERVICE: &str = "coherence-service";
pub const COMPONENT_SERVICE_MONITOR: &str = "coherence-service-monitor";
pub const COMPONENT_STORAGE: &str = "coherence-storage";
pub const COMPONENT_ROLE: &str = "coherence-role";

// 注解
pub const ANNOTATION_TOLERATE_UNREADY: &str = "service.alpha.kubernetes.io/tolerate-unready-endpoints";
pub const ANNOTATION_SCALING_POLICY: &str = "coherence.oracle.com/scaling-policy";
pub const ANNOTATION_STORAGE_VERSION: &str = "coherence.oracle.com/storage-version";

// 容器名
pub const CONTAINER_COHERENCE: &str = "coherence";
pub const CONTAINER_UTILS: &str = "coherence-k8s-utils";
pub const CONTAINER_APPLICATION: &str = "application";
pub const CONTAINER_FLUENTD: &str = "fluentd";

// 卷名
pub const VOLUME_PERSISTENCE: &str = "persistence-volume";
pub const VOLUME_SNAPSHOT: &str = "snapshot-volume";
pub const VOLUME_LOGS: &str = "log-dir";
pub const VOLUME_UTILS: &str = "utils-dir";
pub const VOLUME_JVM: &str = "jvm";
pub const VOLUME_SCRIPTS: &str = "scripts";
pub const VOLUME_LOGGING_CONFIG: &str = "logging-config";
pub const VOLUME_FLUENTD_CONFIG: &str = "fluentd-coherence-conf";

// 挂载路径
pub const MOUNT_PERSISTENCE: &str = "/persistence";
pub const MOUNT_SNAPSHOT: &str = "/snapshot";
pub const MOUNT_LOGS: &str = "/logs";
pub const MOUNT_UTILS: &str = "/utils";
pub const MOUNT_JVM: &str = "/jvm";
pub const MOUNT_SCRIPTS: &str = "/scripts";
pub const MOUNT_LOGGING_CONFIG: &str = "/loggingconfig";
pub const MOUNT_FLUENTD_CONFIG: &str = "/fluentd/etc/fluentd-coherence.conf";
pub const FLUENTD_CONFIG_FILE: &str = "fluentd-coherence.conf";

/// 默认日志配置文件
pub const DEFAULT_LOGGING_CONFIG: &str = "/scripts/logging.properties";

// 端口
pub const PORT_NAME_EXTEND: &str = "extend";
pub const PORT_NAME_EXTEND_TARGET: &str = "extend-port";
pub const PORT_NAME_HEALTH: &str = "health";
pub const PORT_NAME_MANAGEMENT: &str = "management";
pub const PORT_NAME_METRICS: &str = "metrics";
pub const DEFAULT_EXTEND_PORT: i32 = 20000;
pub const DEFAULT_MANAGEMENT_PORT: i32 = 30000;
pub const DEFAULT_METRICS_PORT: i32 = 9612;
pub const DEFAULT_JMXMP_PORT: i32 = 9099;
pub const DEFAULT_HEALTH_PORT: i32 = 6676;

/// Operator 配置 Secret 名称
pub const OPERATOR_CONFIG_NAME: &str = "coherence-operator-config";
/// Operator 配置 Secret 中保存地址的键
pub const OPERATOR_CONFIG_KEY_HOST: &str = "operator-host";

/// 默认 Fluentd 镜像
pub const DEFAULT_FLUENTD_IMAGE: &str = "fluent/fluentd-kubernetes-daemonset:v1.3.3-debian-elasticsearch-1.3";

/// 默认拓扑标签
pub const DEFAULT_TOPOLOGY_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";

// 环境变量
pub const ENV_WKA: &str = "COH_WKA";
pub const ENV_MACHINE_NAME: &str = "COH_MACHINE_NAME";
pub const ENV_MEMBER_NAME: &str = "COH_MEMBER_NAME";
pub const ENV_CLUSTER_NAME: &str = "COH_CLUSTER_NAME";
pub const ENV_ROLE: &str = "COH_ROLE";
pub const ENV_OPERATOR_HOST: &str = "OPERATOR_HOST";
pub const ENV_SITE_INFO: &str = "COH_SITE_INFO_LOCATION";
pub const ENV_RACK_INFO: &str = "COH_RACK_INFO_LOCATION";
pub const ENV_HEALTH_PORT: &str = "COH_HEALTH_PORT";
pub const ENV_STORAGE_ENABLED: &str = "COH_STORAGE_ENABLED";
pub const ENV_CACHE_CONFIG: &str = "COH_CACHE_CONFIG";
pub const ENV_LOG_LEVEL: &str = "COH_LOG_LEVEL";
pub const ENV_LOGGING_CONFIG: &str = "COH_LOGGING_CONFIG";
pub const ENV_PERSISTENCE_ENABLED: &str = "COH_PERSISTENCE_ENABLED";
pub const ENV_SNAPSHOT_ENABLED: &str = "COH_SNAPSHOT_ENABLED";
pub const ENV_MGMT_ENABLED: &str = "COH_MGMT_ENABLED";
pub const ENV_MGMT_PORT: &str = "COH_MGMT_HTTP_PORT";
pub const ENV_METRICS_ENABLED: &str = "COH_METRICS_ENABLED";
pub const ENV_METRICS_PORT: &str = "COH_METRICS_PORT";
pub const ENV_MAX_HEAP: &str = "MAX_HEAP";
pub const ENV_JVM_ARGS: &str = "JVM_ARGS";
pub const ENV_JMXMP_ENABLED: &str = "JVM_JMXMP_ENABLED";
pub const ENV_JMXMP_PORT: &str = "JVM_JMXMP_PORT";
pub const ENV_USE_CONTAINER_LIMITS: &str = "JVM_USE_CONTAINER_LIMITS";
pub const ENV_GC_COLLECTOR: &str = "JVM_GC_COLLECTOR";
pub const ENV_GC_LOGGING: &str = "JVM_GC_LOGGING";
pub const ENV_APP_DIR: &str = "COH_APP_DIR";
pub const ENV_APP_MAIN: &str = "COH_MAIN_CLASS";
pub const ENV_APP_ARGS: &str = "COH_MAIN_ARGS";
pub const ENV_UTILS_DIR: &str = "COH_UTILS_DIR";

/// 默认 Coherence 镜像
pub const DEFAULT_COHERENCE_IMAGE: &str = "oracle/coherence-ce:14.1.1-0-1";
/// 默认工具镜像
pub const DEFAULT_UTILS_IMAGE: &str = "oracle/coherence-operator:utils";

// 探针
pub const DEFAULT_READINESS_PATH: &str = "/ready";
pub const DEFAULT_LIVENESS_PATH: &str = "/healthz";

// Fluentd 边车环境变量
pub const ENV_FLUENTD_CLUSTER: &str = "COHERENCE_CLUSTER";
pub const ENV_FLUENTD_ROLE: &str = "COHERENCE_ROLE";
pub const ENV_FLUENTD_CONF: &str = "FLUENTD_CONF";
pub const ENV_FLUENTD_SED_DISABLE: &str = "FLUENT_ELASTICSEARCH_SED_DISABLE";
pub const ENV_ES_HOST: &str = "ELASTICSEARCH_HOST";
pub const ENV_ES_PORT: &str = "ELASTICSEARCH_PORT";
pub const ENV_ES_USER: &str = "ELASTICSEARCH_USER";
pub const ENV_ES_PASSWORD: &str = "ELASTICSEARCH_PASSWORD";

/// 应用初始化容器复制应用文件的目标目录
pub const APP_COPY_DIR: &str = "/utils/app";
/// 未声明应用目录时的默认值
pub const DEFAULT_APP_DIR: &str = "/app";
