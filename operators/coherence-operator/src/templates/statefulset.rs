//! Coherence 成员 StatefulSet

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use super::env::{coherence_env, fluentd_env};
use super::{port_number, SynthesisContext};
use crate::crd::constants::*;
use crate::crd::{PersistentStorageSpec, ReadinessProbeSpec};
use crate::error::Result;
use crate::merge::{merge_map, merge_named};

const REVISION_HISTORY_LIMIT: i32 = 5;
const DEFAULT_STORAGE_REQUEST: &str = "1Gi";
const SCRIPTS_MODE: i32 = 0o777;

/// 探针内置默认值
struct ProbeDefaults {
    path: &'static str,
    initial_delay: i32,
    period: i32,
    timeout: i32,
    success: i32,
    failure: i32,
}

const READINESS: ProbeDefaults = ProbeDefaults {
    path: DEFAULT_READINESS_PATH,
    initial_delay: 30,
    period: 60,
    timeout: 30,
    success: 1,
    failure: 50,
};

const LIVENESS: ProbeDefaults = ProbeDefaults {
    path: DEFAULT_LIVENESS_PATH,
    initial_delay: 60,
    period: 60,
    timeout: 30,
    success: 1,
    failure: 5,
};

/// 持久化或快照是否启用：未显式设置时，声明了 PVC 或卷即视为启用
pub fn storage_active(storage: Option<&PersistentStorageSpec>) -> bool {
    match storage {
        None => false,
        Some(s) => s
            .enabled
            .unwrap_or(s.persistent_volume_claim.is_some() || s.volume.is_some()),
    }
}

/// 持久化与快照对应的卷：要么是 Pod 卷，要么是卷声明模板，不会同时出现
enum StorageVolume {
    Pod(Volume),
    Claim(PersistentVolumeClaim),
}

fn storage_volume(storage: Option<&PersistentStorageSpec>, name: &str) -> Option<StorageVolume> {
    let storage = storage.filter(|s| storage_active(Some(*s)))?;
    if storage.persistent_volume_claim.is_none() {
        if let Some(volume) = &storage.volume {
            return Some(StorageVolume::Pod(volume.to_volume(name)));
        }
    }

    let spec = storage.persistent_volume_claim.clone().unwrap_or_else(|| PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(DEFAULT_STORAGE_REQUEST.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    });
    Some(StorageVolume::Claim(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }))
}

/// 按声明的探针设置生成探针，处理器优先级 exec > httpGet > tcpSocket > 默认 HTTP
fn probe(declared: Option<&ReadinessProbeSpec>, defaults: &ProbeDefaults) -> Probe {
    let declared = declared.cloned().unwrap_or_default();
    let mut probe = Probe {
        initial_delay_seconds: Some(declared.initial_delay_seconds.unwrap_or(defaults.initial_delay)),
        period_seconds: Some(declared.period_seconds.unwrap_or(defaults.period)),
        timeout_seconds: Some(declared.timeout_seconds.unwrap_or(defaults.timeout)),
        success_threshold: Some(declared.success_threshold.unwrap_or(defaults.success)),
        failure_threshold: Some(declared.failure_threshold.unwrap_or(defaults.failure)),
        ..Default::default()
    };

    if declared.exec.is_some() {
        probe.exec = declared.exec;
    } else if declared.http_get.is_some() {
        probe.http_get = declared.http_get;
    } else if declared.tcp_socket.is_some() {
        probe.tcp_socket = declared.tcp_socket;
    } else {
        probe.http_get = Some(HTTPGetAction {
            path: Some(defaults.path.to_string()),
            port: IntOrString::String(PORT_NAME_HEALTH.to_string()),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        });
    }
    probe
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: String, mode: Option<i32>) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map),
            default_mode: mode,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([("cpu".to_string(), Quantity("32".to_string()))])),
        requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("0".to_string()))])),
        ..Default::default()
    }
}

/// 未声明亲和性时按可用区分散同一部署的 Pod
fn default_affinity(ctx: &SynthesisContext) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                weight: 1,
                pod_affinity_term: PodAffinityTerm {
                    topology_key: DEFAULT_TOPOLOGY_LABEL.to_string(),
                    label_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([
                            (LABEL_COHERENCE_CLUSTER.to_string(), ctx.cluster()),
                            (LABEL_COHERENCE_DEPLOYMENT.to_string(), ctx.name()),
                        ])),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 容器端口：健康检查端口在前，其后是声明的命名端口
fn container_ports(ctx: &SynthesisContext) -> Result<Vec<ContainerPort>> {
    let mut ports = vec![ContainerPort {
        name: Some(PORT_NAME_HEALTH.to_string()),
        container_port: ctx.spec().get_health_port(),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    for port in ctx.spec().ports.iter().flatten() {
        ports.push(ContainerPort {
            name: Some(port.name.clone()),
            container_port: port_number(port)?,
            protocol: Some(port.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
            host_port: port.host_port,
            host_ip: port.host_ip.clone(),
        });
    }
    Ok(ports)
}

fn utils_container(ctx: &SynthesisContext) -> Container {
    let utils = ctx.spec().coherence_utils.clone().unwrap_or_default();
    let image = utils
        .image
        .or_else(|| ctx.flags.utils_image.clone())
        .unwrap_or_else(|| DEFAULT_UTILS_IMAGE.to_string());
    Container {
        name: CONTAINER_UTILS.to_string(),
        image_pull_policy: ctx.pull_policy(utils.image_pull_policy.as_ref(), &image),
        image: Some(image),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("cp -R /files/* {}/", MOUNT_UTILS),
        ]),
        volume_mounts: Some(vec![mount(VOLUME_UTILS, MOUNT_UTILS)]),
        ..Default::default()
    }
}

/// 应用镜像初始化容器，把应用文件复制到工具目录
fn application_container(ctx: &SynthesisContext) -> Option<Container> {
    let app = ctx.spec().application.as_ref()?;
    let image = app.image.clone()?;
    let app_dir = app.app_dir.clone().unwrap_or_else(|| DEFAULT_APP_DIR.to_string());
    Some(Container {
        name: CONTAINER_APPLICATION.to_string(),
        image_pull_policy: ctx.pull_policy(app.image_pull_policy.as_ref(), &image),
        image: Some(image),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("mkdir -p {dst} && cp -R {src}/. {dst}/", src = app_dir, dst = APP_COPY_DIR),
        ]),
        volume_mounts: Some(vec![mount(VOLUME_UTILS, MOUNT_UTILS)]),
        ..Default::default()
    })
}

fn fluentd_container(ctx: &SynthesisContext) -> Container {
    let fluentd = ctx
        .spec()
        .logging
        .as_ref()
        .and_then(|l| l.fluentd.clone())
        .unwrap_or_default();
    let image = fluentd.image.unwrap_or_else(|| ctx.flags.fluentd_image.clone());
    Container {
        name: CONTAINER_FLUENTD.to_string(),
        image_pull_policy: ctx.pull_policy(fluentd.image_pull_policy.as_ref(), &image),
        image: Some(image),
        args: Some(vec!["-c".to_string(), MOUNT_FLUENTD_CONFIG.to_string()]),
        env: Some(fluentd_env(ctx)),
        volume_mounts: Some(vec![
            VolumeMount {
                read_only: Some(true),
                ..mount(VOLUME_LOGS, MOUNT_LOGS)
            },
            VolumeMount {
                read_only: Some(true),
                sub_path: Some(FLUENTD_CONFIG_FILE.to_string()),
                ..mount(VOLUME_FLUENTD_CONFIG, MOUNT_FLUENTD_CONFIG)
            },
        ]),
        ..Default::default()
    }
}

/// 生成 StatefulSet
pub fn statefulset(ctx: &SynthesisContext) -> Result<StatefulSet> {
    let spec = ctx.spec();
    let name = ctx.name();
    let coherence = spec.coherence.clone().unwrap_or_default();

    // 卷与挂载
    let mut volumes = vec![
        empty_dir(VOLUME_LOGS),
        empty_dir(VOLUME_UTILS),
        empty_dir(VOLUME_JVM),
        config_map_volume(
            VOLUME_SCRIPTS,
            format!("{}{}", name, SCRIPTS_CONFIG_MAP_SUFFIX),
            Some(SCRIPTS_MODE),
        ),
    ];
    let mut mounts = vec![
        mount(VOLUME_LOGS, MOUNT_LOGS),
        mount(VOLUME_UTILS, MOUNT_UTILS),
        mount(VOLUME_JVM, MOUNT_JVM),
        mount(VOLUME_SCRIPTS, MOUNT_SCRIPTS),
    ];
    let mut claims = Vec::new();

    let storages = [
        (coherence.persistence.as_ref(), VOLUME_PERSISTENCE, MOUNT_PERSISTENCE),
        (coherence.snapshot.as_ref(), VOLUME_SNAPSHOT, MOUNT_SNAPSHOT),
    ];
    for (storage, volume_name, path) in storages {
        match storage_volume(storage, volume_name) {
            Some(StorageVolume::Pod(volume)) => volumes.push(volume),
            Some(StorageVolume::Claim(claim)) => claims.push(claim),
            None => continue,
        }
        mounts.push(mount(volume_name, path));
    }

    if let Some(config_map) = spec.logging.as_ref().and_then(|l| l.config_map_name.clone()) {
        volumes.push(config_map_volume(VOLUME_LOGGING_CONFIG, config_map, None));
        mounts.push(mount(VOLUME_LOGGING_CONFIG, MOUNT_LOGGING_CONFIG));
    }

    let fluentd = ctx.fluentd_enabled();
    if fluentd {
        volumes.push(config_map_volume(
            VOLUME_FLUENTD_CONFIG,
            format!("{}{}", name, EFK_CONFIG_MAP_SUFFIX),
            None,
        ));
    }

    let volumes = merge_named(&spec.volumes, &Some(volumes), |v: &Volume| v.name.as_str()).unwrap_or_default();
    let mounts = merge_named(&spec.volume_mounts, &Some(mounts), |m: &VolumeMount| m.name.as_str())
        .unwrap_or_default();
    claims.extend(spec.volume_claim_templates.iter().flatten().cloned());

    // 容器
    let image = spec
        .image
        .clone()
        .or_else(|| ctx.flags.coherence_image.clone())
        .unwrap_or_else(|| DEFAULT_COHERENCE_IMAGE.to_string());
    let coherence_container = Container {
        name: CONTAINER_COHERENCE.to_string(),
        image_pull_policy: ctx.pull_policy(spec.image_pull_policy.as_ref(), &image),
        image: Some(image),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-x".to_string(),
            format!("{}/startCoherence.sh", MOUNT_SCRIPTS),
        ]),
        ports: Some(container_ports(ctx)?),
        env: Some(coherence_env(ctx)),
        readiness_probe: Some(probe(spec.readiness_probe.as_ref(), &READINESS)),
        liveness_probe: Some(probe(spec.liveness_probe.as_ref(), &LIVENESS)),
        resources: Some(spec.resources.clone().unwrap_or_else(default_resources)),
        security_context: spec.container_security_context.clone(),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    let mut init_containers = vec![utils_container(ctx)];
    init_containers.extend(application_container(ctx));

    let mut containers = vec![coherence_container];
    if fluentd {
        containers.push(fluentd_container(ctx));
    }

    // Pod 标签：系统标签覆盖同名的用户标签
    let mut system_labels = ctx.pod_selector();
    system_labels.insert(LABEL_COHERENCE_ROLE.to_string(), spec.get_role_name().to_string());
    system_labels.insert(LABEL_WKA_MEMBER.to_string(), spec.is_wka_member().to_string());
    let pod_labels = merge_map(&Some(system_labels), &spec.labels);

    let network = spec.network.clone().unwrap_or_default();
    let pod = PodSpec {
        init_containers: Some(init_containers),
        containers,
        volumes: Some(volumes),
        affinity: Some(spec.affinity.clone().unwrap_or_else(|| default_affinity(ctx))),
        node_selector: spec.node_selector.clone(),
        tolerations: spec.tolerations.clone(),
        security_context: spec.security_context.clone(),
        share_process_namespace: spec.share_process_namespace,
        host_ipc: spec.host_ipc,
        host_network: network.host_network,
        host_aliases: network.host_aliases,
        hostname: network.hostname,
        dns_policy: network.dns_policy,
        dns_config: network.dns_config,
        image_pull_secrets: spec.image_pull_secrets.clone(),
        service_account_name: spec.service_account_name.clone(),
        ..Default::default()
    };

    let mut metadata = ctx.metadata(name.clone(), COMPONENT_STATEFULSET);
    metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_SCALING_POLICY.to_string(),
        spec.get_scaling_policy().as_str().to_string(),
    )]));

    Ok(StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(spec.get_replicas()),
            selector: LabelSelector {
                match_labels: Some(ctx.pod_selector()),
                ..Default::default()
            },
            service_name: ctx.deployment.wka_service_name(),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: pod_labels,
                    annotations: spec.annotations.clone(),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            volume_claim_templates: if claims.is_empty() { None } else { Some(claims) },
            ..Default::default()
        }),
        ..Default::default()
    })
}
