//! 合并与默认值模块
//!
//! 有效规范 = 覆盖值（角色）合并到默认值（集群）之上：
//! - 标量字段：覆盖值存在则取覆盖值，否则取默认值，两者都没有时留空，
//!   由模板层再应用内置默认值；
//! - 嵌套结构：递归合并；
//! - 映射（标签、注解）：取并集，键冲突时覆盖值优先，覆盖值为空串表示删除该键；
//! - 有序列表（环境变量、卷、端口、参数）：先放默认值中未被覆盖的条目，再追加覆盖值的条目，按名称去重。
//!
//! 亲和性、节点选择器、容忍度和资源限制作为整体替换，不做合并。

use k8s_openapi::api::core::v1::{EnvVar, PersistentVolumeClaim, Volume, VolumeMount};
use std::collections::BTreeMap;

use crate::crd::*;

/// 以 `defaults` 为默认值合并出新值，`self` 中已设置的字段优先
pub trait Merge: Sized {
    fn merge(&self, defaults: &Self) -> Self;
}

/// 标量字段：覆盖值优先
fn pick<T: Clone>(value: &Option<T>, default: &Option<T>) -> Option<T> {
    value.clone().or_else(|| default.clone())
}

/// 嵌套字段：两边都有时递归合并
fn nested<T: Merge + Clone>(value: &Option<T>, default: &Option<T>) -> Option<T> {
    match (value, default) {
        (Some(v), Some(d)) => Some(v.merge(d)),
        _ => pick(value, default),
    }
}

/// 映射合并
pub fn merge_map(
    value: &Option<BTreeMap<String, String>>,
    default: &Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    if value.is_none() && default.is_none() {
        return None;
    }

    let mut merged: BTreeMap<String, String> = default
        .iter()
        .flatten()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (k, v) in value.iter().flatten() {
        if v.is_empty() {
            merged.remove(k);
        } else {
            merged.insert(k.clone(), v.clone());
        }
    }

    Some(merged)
}

/// 按名称去重的列表合并：默认值中未被覆盖的条目在前，覆盖值的条目在后
pub fn merge_named<T, F>(value: &Option<Vec<T>>, default: &Option<Vec<T>>, key: F) -> Option<Vec<T>>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    match (value, default) {
        (None, None) => None,
        (Some(v), None) => Some(v.clone()),
        (None, Some(d)) => Some(d.clone()),
        (Some(v), Some(d)) => {
            let mut merged: Vec<T> = d
                .iter()
                .filter(|item| !v.iter().any(|o| key(o) == key(item)))
                .cloned()
                .collect();
            merged.extend(v.iter().cloned());
            Some(merged)
        }
    }
}

fn merge_args(value: &Option<Vec<String>>, default: &Option<Vec<String>>) -> Option<Vec<String>> {
    merge_named(value, default, |s: &String| s.as_str())
}

fn merge_env(value: &Option<Vec<EnvVar>>, default: &Option<Vec<EnvVar>>) -> Option<Vec<EnvVar>> {
    merge_named(value, default, |e: &EnvVar| e.name.as_str())
}

fn merge_volumes(value: &Option<Vec<Volume>>, default: &Option<Vec<Volume>>) -> Option<Vec<Volume>> {
    merge_named(value, default, |v: &Volume| v.name.as_str())
}

fn merge_volume_mounts(
    value: &Option<Vec<VolumeMount>>,
    default: &Option<Vec<VolumeMount>>,
) -> Option<Vec<VolumeMount>> {
    merge_named(value, default, |v: &VolumeMount| v.name.as_str())
}

fn merge_claims(
    value: &Option<Vec<PersistentVolumeClaim>>,
    default: &Option<Vec<PersistentVolumeClaim>>,
) -> Option<Vec<PersistentVolumeClaim>> {
    merge_named(value, default, |c: &PersistentVolumeClaim| {
        c.metadata.name.as_deref().unwrap_or_default()
    })
}

/// 端口列表：同名端口逐字段合并
fn merge_ports(
    value: &Option<Vec<NamedPortSpec>>,
    default: &Option<Vec<NamedPortSpec>>,
) -> Option<Vec<NamedPortSpec>> {
    match (value, default) {
        (Some(v), Some(d)) => {
            let mut merged: Vec<NamedPortSpec> = d
                .iter()
                .filter(|p| !v.iter().any(|o| o.name == p.name))
                .cloned()
                .collect();
            for port in v {
                match d.iter().find(|p| p.name == port.name) {
                    Some(default) => merged.push(port.merge(default)),
                    None => merged.push(port.clone()),
                }
            }
            Some(merged)
        }
        _ => pick(value, default),
    }
}

impl Merge for CoherenceResourceSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            cluster: pick(&self.cluster, &d.cluster),
            role: pick(&self.role, &d.role),
            replicas: pick(&self.replicas, &d.replicas),
            image: pick(&self.image, &d.image),
            image_pull_policy: pick(&self.image_pull_policy, &d.image_pull_policy),
            image_pull_secrets: merge_named(&self.image_pull_secrets, &d.image_pull_secrets, |s| {
                s.name.as_deref().unwrap_or_default()
            }),
            coherence_utils: nested(&self.coherence_utils, &d.coherence_utils),
            application: nested(&self.application, &d.application),
            coherence: nested(&self.coherence, &d.coherence),
            logging: nested(&self.logging, &d.logging),
            jvm: nested(&self.jvm, &d.jvm),
            ports: merge_ports(&self.ports, &d.ports),
            env: merge_env(&self.env, &d.env),
            health_port: pick(&self.health_port, &d.health_port),
            readiness_probe: nested(&self.readiness_probe, &d.readiness_probe),
            liveness_probe: nested(&self.liveness_probe, &d.liveness_probe),
            scaling: nested(&self.scaling, &d.scaling),
            resources: pick(&self.resources, &d.resources),
            annotations: merge_map(&self.annotations, &d.annotations),
            labels: merge_map(&self.labels, &d.labels),
            volumes: merge_volumes(&self.volumes, &d.volumes),
            volume_claim_templates: merge_claims(&self.volume_claim_templates, &d.volume_claim_templates),
            volume_mounts: merge_volume_mounts(&self.volume_mounts, &d.volume_mounts),
            affinity: pick(&self.affinity, &d.affinity),
            node_selector: pick(&self.node_selector, &d.node_selector),
            tolerations: pick(&self.tolerations, &d.tolerations),
            security_context: pick(&self.security_context, &d.security_context),
            container_security_context: pick(
                &self.container_security_context,
                &d.container_security_context,
            ),
            share_process_namespace: pick(&self.share_process_namespace, &d.share_process_namespace),
            host_ipc: pick(&self.host_ipc, &d.host_ipc),
            network: nested(&self.network, &d.network),
            service_account_name: pick(&self.service_account_name, &d.service_account_name),
        }
    }
}

impl Merge for ImageSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            image: pick(&self.image, &d.image),
            image_pull_policy: pick(&self.image_pull_policy, &d.image_pull_policy),
        }
    }
}

impl Merge for ApplicationSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            image: pick(&self.image, &d.image),
            image_pull_policy: pick(&self.image_pull_policy, &d.image_pull_policy),
            app_dir: pick(&self.app_dir, &d.app_dir),
            main: pick(&self.main, &d.main),
            // 主类参数整体替换
            args: pick(&self.args, &d.args),
        }
    }
}

impl Merge for CoherenceSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            cache_config: pick(&self.cache_config, &d.cache_config),
            storage_enabled: pick(&self.storage_enabled, &d.storage_enabled),
            log_level: pick(&self.log_level, &d.log_level),
            exclude_from_wka: pick(&self.exclude_from_wka, &d.exclude_from_wka),
            persistence: nested(&self.persistence, &d.persistence),
            snapshot: nested(&self.snapshot, &d.snapshot),
            management: nested(&self.management, &d.management),
            metrics: nested(&self.metrics, &d.metrics),
        }
    }
}

impl Merge for PersistentStorageSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            enabled: pick(&self.enabled, &d.enabled),
            persistent_volume_claim: pick(&self.persistent_volume_claim, &d.persistent_volume_claim),
            volume: pick(&self.volume, &d.volume),
        }
    }
}

impl Merge for PortToggleSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            enabled: pick(&self.enabled, &d.enabled),
            port: pick(&self.port, &d.port),
        }
    }
}

impl Merge for LoggingSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            config_file: pick(&self.config_file, &d.config_file),
            config_map_name: pick(&self.config_map_name, &d.config_map_name),
            fluentd: nested(&self.fluentd, &d.fluentd),
        }
    }
}

impl Merge for FluentdSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            enabled: pick(&self.enabled, &d.enabled),
            image: pick(&self.image, &d.image),
            image_pull_policy: pick(&self.image_pull_policy, &d.image_pull_policy),
            tag: pick(&self.tag, &d.tag),
        }
    }
}

impl Merge for JvmSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            args: merge_args(&self.args, &d.args),
            heap_size: pick(&self.heap_size, &d.heap_size),
            jmxmp: nested(&self.jmxmp, &d.jmxmp),
            use_container_limits: pick(&self.use_container_limits, &d.use_container_limits),
            gc: nested(&self.gc, &d.gc),
        }
    }
}

impl Merge for JvmGarbageCollectorSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            collector: pick(&self.collector, &d.collector),
            logging: pick(&self.logging, &d.logging),
        }
    }
}

impl Merge for NamedPortSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            name: self.name.clone(),
            port: pick(&self.port, &d.port),
            protocol: pick(&self.protocol, &d.protocol),
            node_port: pick(&self.node_port, &d.node_port),
            host_port: pick(&self.host_port, &d.host_port),
            host_ip: pick(&self.host_ip, &d.host_ip),
            service: nested(&self.service, &d.service),
            service_monitor: nested(&self.service_monitor, &d.service_monitor),
        }
    }
}

impl Merge for PortServiceSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            enabled: pick(&self.enabled, &d.enabled),
            name: pick(&self.name, &d.name),
            port: pick(&self.port, &d.port),
            type_: pick(&self.type_, &d.type_),
            annotations: merge_map(&self.annotations, &d.annotations),
            labels: merge_map(&self.labels, &d.labels),
        }
    }
}

impl Merge for ServiceMonitorSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            enabled: pick(&self.enabled, &d.enabled),
            path: pick(&self.path, &d.path),
            interval: pick(&self.interval, &d.interval),
            scheme: pick(&self.scheme, &d.scheme),
            labels: merge_map(&self.labels, &d.labels),
        }
    }
}

impl Merge for ReadinessProbeSpec {
    fn merge(&self, d: &Self) -> Self {
        // 处理器作为整体：覆盖值声明了任一处理器时不继承默认值的处理器
        let has_handler = self.exec.is_some() || self.http_get.is_some() || self.tcp_socket.is_some();
        let (exec, http_get, tcp_socket) = if has_handler {
            (self.exec.clone(), self.http_get.clone(), self.tcp_socket.clone())
        } else {
            (d.exec.clone(), d.http_get.clone(), d.tcp_socket.clone())
        };

        Self {
            exec,
            http_get,
            tcp_socket,
            initial_delay_seconds: pick(&self.initial_delay_seconds, &d.initial_delay_seconds),
            timeout_seconds: pick(&self.timeout_seconds, &d.timeout_seconds),
            period_seconds: pick(&self.period_seconds, &d.period_seconds),
            success_threshold: pick(&self.success_threshold, &d.success_threshold),
            failure_threshold: pick(&self.failure_threshold, &d.failure_threshold),
        }
    }
}

impl Merge for ScalingSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            policy: pick(&self.policy, &d.policy),
        }
    }
}

impl Merge for NetworkSpec {
    fn merge(&self, d: &Self) -> Self {
        Self {
            dns_config: pick(&self.dns_config, &d.dns_config),
            dns_policy: pick(&self.dns_policy, &d.dns_policy),
            host_aliases: pick(&self.host_aliases, &d.host_aliases),
            host_network: pick(&self.host_network, &d.host_network),
            hostname: pick(&self.hostname, &d.hostname),
        }
    }
}

/// 计算角色的有效规范：角色覆盖集群默认值
pub fn effective_role_spec(
    cluster_defaults: &CoherenceResourceSpec,
    role: &CoherenceResourceSpec,
) -> CoherenceResourceSpec {
    let mut effective = role.merge(cluster_defaults);
    // 角色列表不向下传递
    effective.role = role.role.clone();
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn probe(timeout: Option<i32>, period: Option<i32>) -> ReadinessProbeSpec {
        ReadinessProbeSpec {
            timeout_seconds: timeout,
            period_seconds: period,
            ..Default::default()
        }
    }

    #[test]
    fn test_role_probe_overrides_cluster() {
        let cluster = CoherenceResourceSpec {
            readiness_probe: Some(ReadinessProbeSpec {
                timeout_seconds: Some(100),
                initial_delay_seconds: Some(10),
                failure_threshold: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            readiness_probe: Some(probe(Some(99), None)),
            ..Default::default()
        };

        let effective = role.merge(&cluster);
        let probe = effective.readiness_probe.unwrap();
        assert_eq!(probe.timeout_seconds, Some(99));
        assert_eq!(probe.initial_delay_seconds, Some(10));
        assert_eq!(probe.failure_threshold, Some(20));
        assert_eq!(probe.period_seconds, None);
    }

    #[rstest]
    #[case(Some(5), Some(7), Some(5))]
    #[case(None, Some(7), Some(7))]
    #[case(Some(0), Some(7), Some(0))]
    #[case(None, None, None)]
    fn test_override_precedence(
        #[case] role: Option<i32>,
        #[case] cluster: Option<i32>,
        #[case] expected: Option<i32>,
    ) {
        let role = CoherenceResourceSpec {
            replicas: role,
            health_port: role,
            ..Default::default()
        };
        let cluster = CoherenceResourceSpec {
            replicas: cluster,
            health_port: cluster,
            ..Default::default()
        };
        let effective = role.merge(&cluster);
        assert_eq!(effective.replicas, expected);
        assert_eq!(effective.health_port, expected);
    }

    #[rstest]
    #[case(None, Some(true), Some(true))]
    #[case(Some(false), Some(true), Some(false))]
    #[case(Some(true), Some(false), Some(true))]
    #[case(None, None, None)]
    fn test_three_valued_boolean(
        #[case] role: Option<bool>,
        #[case] cluster: Option<bool>,
        #[case] expected: Option<bool>,
    ) {
        let fluentd = |enabled| LoggingSpec {
            fluentd: Some(FluentdSpec {
                enabled,
                ..Default::default()
            }),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            logging: Some(fluentd(role)),
            ..Default::default()
        };
        let cluster = CoherenceResourceSpec {
            logging: Some(fluentd(cluster)),
            ..Default::default()
        };
        let effective = role.merge(&cluster);
        assert_eq!(effective.logging.unwrap().fluentd.unwrap().enabled, expected);
    }

    #[test]
    fn test_maps_union_with_role_winning() {
        let cluster = Some(BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]));
        let role = Some(BTreeMap::from([
            ("b".to_string(), "20".to_string()),
            ("c".to_string(), String::new()),
            ("d".to_string(), "4".to_string()),
        ]));

        let merged = merge_map(&role, &cluster).unwrap();
        assert_eq!(
            merged,
            BTreeMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "20".to_string()),
                ("d".to_string(), "4".to_string()),
            ])
        );
        assert_eq!(merge_map(&None, &None), None);
    }

    #[test]
    fn test_env_appended_after_defaults() {
        let env = |name: &str, value: &str| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        };
        let cluster = Some(vec![env("A", "1"), env("B", "2")]);
        let role = Some(vec![env("B", "20"), env("C", "3")]);

        let merged = merge_env(&role, &cluster).unwrap();
        let names: Vec<_> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(merged[1].value.as_deref(), Some("20"));
    }

    #[test]
    fn test_ports_merge_field_wise() {
        let cluster = CoherenceResourceSpec {
            ports: Some(vec![
                NamedPortSpec {
                    name: "extend".into(),
                    port: Some(20000),
                    node_port: Some(80),
                    ..Default::default()
                },
                NamedPortSpec {
                    name: "metrics".into(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            ports: Some(vec![NamedPortSpec {
                name: "extend".into(),
                port: Some(30000),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let ports = role.merge(&cluster).ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "metrics");
        assert_eq!(ports[1].port, Some(30000));
        assert_eq!(ports[1].node_port, Some(80));
    }

    #[test]
    fn test_affinity_not_merged() {
        use k8s_openapi::api::core::v1::{Affinity, NodeAffinity, PodAntiAffinity};
        let cluster = CoherenceResourceSpec {
            affinity: Some(Affinity {
                node_affinity: Some(NodeAffinity::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            affinity: Some(Affinity {
                pod_anti_affinity: Some(PodAntiAffinity::default()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let affinity = role.merge(&cluster).affinity.unwrap();
        assert!(affinity.node_affinity.is_none());
        assert!(affinity.pod_anti_affinity.is_some());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let cluster = CoherenceResourceSpec {
            jvm: Some(JvmSpec {
                args: Some(vec!["-Xlog".into(), "-Dx=1".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            jvm: Some(JvmSpec {
                args: Some(vec!["-Dx=1".into(), "-Dy=2".into()]),
                heap_size: Some("2g".into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let first = role.merge(&cluster);
        let second = role.merge(&cluster);
        assert_eq!(first, second);
        assert_eq!(
            first.jvm.unwrap().args.unwrap(),
            vec!["-Xlog".to_string(), "-Dx=1".to_string(), "-Dy=2".to_string()]
        );
    }

    #[test]
    fn test_effective_role_spec_keeps_role_name() {
        let cluster = CoherenceResourceSpec {
            role: Some("ignored".into()),
            image: Some("coherence:14".into()),
            ..Default::default()
        };
        let role = CoherenceResourceSpec {
            role: Some("data".into()),
            ..Default::default()
        };
        let effective = effective_role_spec(&cluster, &role);
        assert_eq!(effective.role.as_deref(), Some("data"));
        assert_eq!(effective.image.as_deref(), Some("coherence:14"));
    }
}
