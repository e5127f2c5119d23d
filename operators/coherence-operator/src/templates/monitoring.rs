//! Prometheus ServiceMonitor
//!
//! ServiceMonitor 不在 k8s-openapi 中，以 JSON 对象表示，
//! 由客户端按 `monitoring.coreos.com/v1` 动态类型写入。

use serde_json::{json, Value};

use super::services::port_service_labels;
use super::SynthesisContext;
use crate::crd::constants::COMPONENT_SERVICE_MONITOR;
use crate::error::Result;
use crate::merge::merge_map;

pub const API_VERSION: &str = "monitoring.coreos.com/v1";
pub const KIND: &str = "ServiceMonitor";
const DEFAULT_PATH: &str = "/metrics";

/// 为启用了 serviceMonitor 的端口生成 ServiceMonitor，CRD 未安装时不生成
pub fn service_monitors(ctx: &SynthesisContext) -> Result<Vec<Value>> {
    if !ctx.monitoring_available {
        return Ok(Vec::new());
    }

    let mut monitors = Vec::new();
    for port in ctx.spec().ports.iter().flatten() {
        let Some(sm) = port.service_monitor.as_ref().filter(|sm| sm.enabled == Some(true)) else {
            continue;
        };

        let name = format!("{}-{}", ctx.name(), port.name);
        let labels = merge_map(&sm.labels, &Some(ctx.labels(COMPONENT_SERVICE_MONITOR))).unwrap_or_default();

        let mut endpoint = json!({
            "port": port.name,
            "path": sm.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            "relabelings": [{"action": "labeldrop", "regex": "(endpoint)"}],
        });
        if let Some(interval) = &sm.interval {
            endpoint["interval"] = json!(interval);
        }
        if let Some(scheme) = &sm.scheme {
            endpoint["scheme"] = json!(scheme);
        }

        monitors.push(json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": {
                "name": name,
                "namespace": ctx.namespace(),
                "labels": labels,
            },
            "spec": {
                "endpoints": [endpoint],
                "selector": {"matchLabels": port_service_labels(ctx, &port.name)},
            }
        }));
    }
    Ok(monitors)
}
