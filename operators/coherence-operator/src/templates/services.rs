//! WKA 服务与命名端口服务

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use super::{port_number, SynthesisContext};
use crate::crd::constants::*;
use crate::error::Result;
use crate::merge::merge_map;

/// 无头 WKA 服务，选择集群中所有 WKA 成员 Pod
pub fn wka_service(mut metadata: ObjectMeta, cluster: &str) -> Service {
    metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_TOLERATE_UNREADY.to_string(),
        "true".to_string(),
    )]));

    Service {
        metadata,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME_EXTEND.to_string()),
                protocol: Some("TCP".to_string()),
                port: DEFAULT_EXTEND_PORT,
                target_port: Some(IntOrString::String(PORT_NAME_EXTEND_TARGET.to_string())),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([
                (LABEL_COHERENCE_CLUSTER.to_string(), cluster.to_string()),
                (LABEL_COMPONENT.to_string(), COMPONENT_POD.to_string()),
                (LABEL_WKA_MEMBER.to_string(), "true".to_string()),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 命名端口对应的 Service 名
pub fn port_service_name(deployment: &str, port_name: &str, override_name: Option<&str>) -> String {
    match override_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}-{}", deployment, port_name),
    }
}

/// 命名端口服务的标签，ServiceMonitor 也用它做选择器
pub fn port_service_labels(ctx: &SynthesisContext, port_name: &str) -> BTreeMap<String, String> {
    let mut labels = ctx.labels(COMPONENT_PORT_SERVICE);
    labels.insert(LABEL_COHERENCE_PORT.to_string(), port_name.to_string());
    labels
}

/// 为每个启用了服务的命名端口生成 Service
pub fn port_services(ctx: &SynthesisContext) -> Result<Vec<Service>> {
    let mut services = Vec::new();
    for port in ctx.spec().ports.iter().flatten() {
        let service = port.service.clone().unwrap_or_default();
        if service.enabled == Some(false) {
            continue;
        }

        let container_port = port_number(port)?;
        let name = port_service_name(&ctx.name(), &port.name, service.name.as_deref());
        // 系统标签覆盖同名的用户标签，ServiceMonitor 依赖它们选择服务
        let labels = merge_map(&Some(port_service_labels(ctx, &port.name)), &service.labels);

        services.push(Service {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: ctx.namespace(),
                labels,
                annotations: service.annotations.clone(),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: service.type_.clone(),
                ports: Some(vec![ServicePort {
                    name: Some(port.name.clone()),
                    protocol: Some(port.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
                    port: service.port.unwrap_or(container_port),
                    target_port: Some(IntOrString::Int(container_port)),
                    node_port: port.node_port,
                    ..Default::default()
                }]),
                selector: Some(ctx.pod_selector()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    Ok(services)
}
