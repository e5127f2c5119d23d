//! Operator 配置 Secret
//!
//! 每个命名空间一个 `coherence-operator-config` Secret，
//! `operator-host` 键保存 Pod 访问拓扑服务时使用的 `host:port`。

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::client::KubeOps;
use crate::crd::constants::{OPERATOR_CONFIG_KEY_HOST, OPERATOR_CONFIG_NAME};
use crate::error::{Error, Result};
use crate::flags::{OperatorFlags, DEFAULT_REST_HOST};
use crate::resources::ResourceKind;

/// 计算 Pod 访问 Operator 的 `host:port`
///
/// 主机名优先使用 service-name，其次是非通配的 rest-host，最后是本机地址。
pub fn operator_host<F>(flags: &OperatorFlags, local_address: F) -> Result<String>
where
    F: FnOnce() -> coherence_common::Result<Ipv4Addr>,
{
    let host = match flags.service_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if !flags.rest_host.is_empty() && flags.rest_host != DEFAULT_REST_HOST => flags.rest_host.clone(),
        _ => local_address()?.to_string(),
    };
    let port = if flags.service_port == -1 {
        i32::from(flags.rest_port)
    } else {
        flags.service_port
    };
    Ok(format!("{}:{}", host, port))
}

/// 确保命名空间中的 Secret 保存了正确的值，返回是否发生了写入
pub async fn ensure_operator_secret(client: &dyn KubeOps, namespace: &str, host: &str) -> Result<bool> {
    let current = client.get(ResourceKind::Secret, namespace, OPERATOR_CONFIG_NAME).await?;

    let desired = secret(namespace, host);
    let object = serde_json::to_value(&desired).map_err(|e| Error::FatalSpec(e.to_string()))?;

    match current {
        None => {
            client.create(ResourceKind::Secret, namespace, &object).await?;
            info!(namespace, host, "已创建 Operator 配置 Secret");
            Ok(true)
        }
        Some(current) => {
            let current: Secret = serde_json::from_value(current)
                .map_err(|e| Error::Store(format!("Operator 配置 Secret 格式错误: {}", e)))?;
            if stored_host(&current).as_deref() == Some(host) {
                debug!(namespace, "Operator 配置 Secret 无需更新");
                return Ok(false);
            }
            client
                .replace(ResourceKind::Secret, namespace, OPERATOR_CONFIG_NAME, &object)
                .await?;
            info!(namespace, host, "已更新 Operator 配置 Secret");
            Ok(true)
        }
    }
}

fn secret(namespace: &str, host: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(OPERATOR_CONFIG_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            OPERATOR_CONFIG_KEY_HOST.to_string(),
            ByteString(host.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

fn stored_host(secret: &Secret) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(OPERATOR_CONFIG_KEY_HOST)?;
    String::from_utf8(bytes.0.clone()).ok()
}
