//! 期望状态合成
//!
//! `synthesize` 是纯函数：输入部署、Operator 配置和 ServiceMonitor CRD 是否可用，
//! 输出完整的期望对象集合。不访问 API、时钟或全局状态。

pub mod configmaps;
pub mod env;
pub mod monitoring;
pub mod services;
pub mod statefulset;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};

use crate::crd::constants::*;
use crate::crd::{Coherence, CoherenceResourceSpec, NamedPortSpec};
use crate::error::{Error, Result};
use crate::flags::OperatorFlags;
use crate::resources::{ResourceKind, Resources};

/// 合成输入
pub struct SynthesisContext<'a> {
    pub deployment: &'a Coherence,
    pub flags: &'a OperatorFlags,
    /// ServiceMonitor CRD 是否已安装
    pub monitoring_available: bool,
}

impl<'a> SynthesisContext<'a> {
    pub fn new(deployment: &'a Coherence, flags: &'a OperatorFlags, monitoring_available: bool) -> Self {
        Self {
            deployment,
            flags,
            monitoring_available,
        }
    }

    pub fn spec(&self) -> &CoherenceResourceSpec {
        &self.deployment.spec
    }

    pub fn name(&self) -> String {
        self.deployment.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.deployment.namespace()
    }

    pub fn cluster(&self) -> String {
        self.deployment.cluster_name()
    }

    /// 通用标签
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_COHERENCE_CLUSTER.to_string(), self.cluster()),
            (LABEL_COHERENCE_DEPLOYMENT.to_string(), self.name()),
            (LABEL_COHERENCE_ROLE.to_string(), self.spec().get_role_name().to_string()),
            (LABEL_COMPONENT.to_string(), component.to_string()),
        ])
    }

    /// StatefulSet 的 Pod 选择器
    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_COHERENCE_CLUSTER.to_string(), self.cluster()),
            (LABEL_COHERENCE_DEPLOYMENT.to_string(), self.name()),
            (LABEL_COMPONENT.to_string(), COMPONENT_POD.to_string()),
        ])
    }

    pub fn metadata(&self, name: impl Into<String>, component: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: self.namespace(),
            labels: Some(self.labels(component)),
            ..Default::default()
        }
    }

    /// 日志采集边车是否启用，未设置时使用 log-integration 开关
    pub fn fluentd_enabled(&self) -> bool {
        self.spec()
            .logging
            .as_ref()
            .and_then(|l| l.fluentd.as_ref())
            .and_then(|f| f.enabled)
            .unwrap_or(self.flags.log_integration)
    }

    /// 镜像拉取策略：声明值优先，其次按 force-always-pull-tags 判断
    pub fn pull_policy(&self, declared: Option<&String>, image: &str) -> Option<String> {
        match declared {
            Some(policy) => Some(policy.clone()),
            None if self.flags.force_always_pull(image) => Some("Always".to_string()),
            None => None,
        }
    }
}

/// 端口号，management 和 metrics 未声明端口时使用默认值
pub fn port_number(port: &NamedPortSpec) -> Result<i32> {
    match (port.port, port.name.as_str()) {
        (Some(p), _) => Ok(p),
        (None, PORT_NAME_MANAGEMENT) => Ok(DEFAULT_MANAGEMENT_PORT),
        (None, PORT_NAME_METRICS) => Ok(DEFAULT_METRICS_PORT),
        (None, name) => Err(Error::FatalSpec(format!("端口 {} 没有指定端口号", name))),
    }
}

/// 合成期望对象集合
pub fn synthesize(deployment: &Coherence, flags: &OperatorFlags, monitoring_available: bool) -> Result<Resources> {
    let ctx = SynthesisContext::new(deployment, flags, monitoring_available);
    validate(&ctx)?;

    let mut resources = Resources::new();

    let scripts = configmaps::scripts_config_map(&ctx);
    resources.insert(ResourceKind::ConfigMap, scripts.metadata.name.clone().unwrap_or_default(), &scripts)?;

    if let Some(efk) = configmaps::efk_config_map(&ctx) {
        resources.insert(ResourceKind::ConfigMap, efk.metadata.name.clone().unwrap_or_default(), &efk)?;
    }

    if deployment.owns_wka_service() {
        let wka = services::wka_service(
            ctx.metadata(deployment.wka_service_name(), COMPONENT_WKA_SERVICE),
            &ctx.cluster(),
        );
        resources.insert(ResourceKind::Service, deployment.wka_service_name(), &wka)?;
    }

    for service in services::port_services(&ctx)? {
        resources.insert(ResourceKind::Service, service.metadata.name.clone().unwrap_or_default(), &service)?;
    }

    for monitor in monitoring::service_monitors(&ctx)? {
        let name = monitor["metadata"]["name"].as_str().unwrap_or_default().to_string();
        resources.insert(ResourceKind::ServiceMonitor, name, &monitor)?;
    }

    if ctx.spec().get_replicas() > 0 {
        let sts = statefulset::statefulset(&ctx)?;
        resources.insert(ResourceKind::StatefulSet, ctx.name(), &sts)?;
    }

    Ok(resources)
}

/// 规范一致性检查
fn validate(ctx: &SynthesisContext) -> Result<()> {
    let spec = ctx.spec();

    let mut claims = HashSet::new();
    for claim in spec.volume_claim_templates.iter().flatten() {
        let name = claim.metadata.name.clone().unwrap_or_default();
        if !claims.insert(name.clone()) {
            return Err(Error::FatalSpec(format!("存在重名的卷声明模板 {}", name)));
        }
    }

    let coherence = spec.coherence.as_ref();
    let reserved = [
        (VOLUME_PERSISTENCE, coherence.and_then(|c| c.persistence.as_ref())),
        (VOLUME_SNAPSHOT, coherence.and_then(|c| c.snapshot.as_ref())),
    ];
    for (name, storage) in reserved {
        if statefulset::storage_active(storage) && claims.contains(name) {
            return Err(Error::FatalSpec(format!("卷声明模板名 {} 与持久化设置冲突", name)));
        }
    }

    for port in spec.ports.iter().flatten() {
        port_number(port)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::*;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};

    pub fn deployment(name: &str, spec: CoherenceResourceSpec) -> Coherence {
        let mut coh = Coherence::new(name, spec);
        coh.metadata.namespace = Some("ns1".to_string());
        coh.metadata.uid = Some(format!("uid-{}", name));
        coh
    }

    pub fn statefulset_of(resources: &Resources, name: &str) -> StatefulSet {
        serde_json::from_value(resources.get(ResourceKind::StatefulSet, name).unwrap().spec.clone()).unwrap()
    }

    pub fn service_of(resources: &Resources, name: &str) -> Service {
        serde_json::from_value(resources.get(ResourceKind::Service, name).unwrap().spec.clone()).unwrap()
    }

    fn names(resources: &Resources) -> Vec<(ResourceKind, String)> {
        resources.iter().map(|r| (r.kind, r.name.clone())).collect()
    }

    #[test]
    fn test_minimal_spec() {
        let spec = CoherenceResourceSpec {
            replicas: Some(3),
            ..Default::default()
        };
        let resources = synthesize(&deployment("min", spec), &OperatorFlags::default(), false).unwrap();

        assert_eq!(
            names(&resources),
            vec![
                (ResourceKind::ConfigMap, "min-scripts".to_string()),
                (ResourceKind::Service, "min-wka".to_string()),
                (ResourceKind::StatefulSet, "min".to_string()),
            ]
        );
        let sts = statefulset_of(&resources, "min");
        assert_eq!(sts.spec.unwrap().replicas, Some(3));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let spec = CoherenceResourceSpec {
            replicas: Some(2),
            ports: Some(vec![NamedPortSpec {
                name: "extend".into(),
                port: Some(20000),
                ..Default::default()
            }]),
            labels: Some(BTreeMap::from([("b".into(), "2".into()), ("a".into(), "1".into())])),
            ..Default::default()
        };
        let coh = deployment("det", spec);
        let first = serde_json::to_string(&synthesize(&coh, &OperatorFlags::default(), true).unwrap()).unwrap();
        let second = serde_json::to_string(&synthesize(&coh, &OperatorFlags::default(), true).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wka_selector_matches_pod_labels() {
        let resources = synthesize(&deployment("min", CoherenceResourceSpec::default()), &OperatorFlags::default(), false).unwrap();
        let wka = service_of(&resources, "min-wka");
        let sts = statefulset_of(&resources, "min");

        let selector = wka.spec.unwrap().selector.unwrap();
        let pod_labels = sts.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        for (k, v) in selector {
            assert_eq!(pod_labels.get(&k), Some(&v), "label {}", k);
        }
    }

    #[test]
    fn test_excluded_member_is_outside_wka_selector() {
        let spec = CoherenceResourceSpec {
            coherence: Some(CoherenceSpec {
                exclude_from_wka: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let resources = synthesize(&deployment("min", spec), &OperatorFlags::default(), false).unwrap();
        let selector = service_of(&resources, "min-wka").spec.unwrap().selector.unwrap();
        let sts = statefulset_of(&resources, "min");
        let pod_labels = sts.spec.unwrap().template.metadata.unwrap().labels.unwrap();

        assert_eq!(selector[LABEL_WKA_MEMBER], "true");
        assert_eq!(pod_labels[LABEL_WKA_MEMBER], "false");
        for (k, v) in selector.iter().filter(|(k, _)| k.as_str() != LABEL_WKA_MEMBER) {
            assert_eq!(pod_labels.get(k), Some(v), "label {}", k);
        }
    }

    #[test]
    fn test_role_of_other_cluster_does_not_emit_wka() {
        let spec = CoherenceResourceSpec {
            cluster: Some("prod".into()),
            role: Some("data".into()),
            ..Default::default()
        };
        let resources = synthesize(&deployment("prod-data", spec), &OperatorFlags::default(), false).unwrap();
        assert!(resources.of_kind(ResourceKind::Service).next().is_none());

        let sts = statefulset_of(&resources, "prod-data");
        assert_eq!(sts.spec.unwrap().service_name, "prod-wka");
    }

    #[test]
    fn test_zero_replicas_has_no_statefulset() {
        let spec = CoherenceResourceSpec {
            replicas: Some(0),
            ..Default::default()
        };
        let resources = synthesize(&deployment("stopped", spec), &OperatorFlags::default(), false).unwrap();
        assert!(resources.get(ResourceKind::StatefulSet, "stopped").is_none());
        assert!(resources.get(ResourceKind::ConfigMap, "stopped-scripts").is_some());
    }

    #[test]
    fn test_duplicate_claim_templates_are_fatal() {
        let claim = |name: &str| PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let spec = CoherenceResourceSpec {
            volume_claim_templates: Some(vec![claim("data"), claim("data")]),
            ..Default::default()
        };
        let err = synthesize(&deployment("dup", spec), &OperatorFlags::default(), false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_reserved_claim_name_conflicts_with_persistence() {
        let spec = CoherenceResourceSpec {
            coherence: Some(CoherenceSpec {
                persistence: Some(PersistentStorageSpec {
                    enabled: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(VOLUME_PERSISTENCE.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }]),
            ..Default::default()
        };
        let err = synthesize(&deployment("p", spec), &OperatorFlags::default(), false).unwrap_err();
        assert!(matches!(err, Error::FatalSpec(_)));
    }

    #[test]
    fn test_port_without_number_is_fatal() {
        let spec = CoherenceResourceSpec {
            ports: Some(vec![NamedPortSpec {
                name: "extend".into(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(synthesize(&deployment("p", spec), &OperatorFlags::default(), false).is_err());
    }

    #[test]
    fn test_port_number_defaults() {
        let port = |name: &str| NamedPortSpec {
            name: name.into(),
            ..Default::default()
        };
        assert_eq!(port_number(&port("management")).unwrap(), DEFAULT_MANAGEMENT_PORT);
        assert_eq!(port_number(&port("metrics")).unwrap(), DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_pull_policy() {
        let flags = OperatorFlags {
            force_always_pull_tags: vec!["-SNAPSHOT".into()],
            ..Default::default()
        };
        let coh = deployment("img", CoherenceResourceSpec::default());
        let ctx = SynthesisContext::new(&coh, &flags, false);
        let never = "Never".to_string();
        assert_eq!(ctx.pull_policy(Some(&never), "c:1.0-SNAPSHOT").as_deref(), Some("Never"));
        assert_eq!(ctx.pull_policy(None, "c:1.0-SNAPSHOT").as_deref(), Some("Always"));
        assert_eq!(ctx.pull_policy(None, "c:1.0"), None);
    }
}
