//! CoherenceCluster 自定义资源（早期形态）
//!
//! 一个集群由若干命名角色组成。集群级字段作为所有角色的默认值，
//! 每个角色再用自己的字段覆盖。

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::coherence::CoherenceResourceSpec;
use super::constants::WKA_SERVICE_SUFFIX;

/// Coherence 集群规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "coherence.oracle.com",
    version = "v1",
    kind = "CoherenceCluster",
    namespaced,
    shortname = "cohc"
)]
#[kube(status = "CoherenceClusterStatus")]
#[kube(printcolumn = r#"{"name":"Roles", "type":"integer", "jsonPath":".status.roles"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceClusterSpec {
    /// 集群级默认值，适用于所有角色
    #[serde(flatten)]
    pub defaults: CoherenceResourceSpec,
    /// 角色列表，为空时集群只有一个默认角色
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<CoherenceResourceSpec>>,
}

/// 集群状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceClusterStatus {
    /// 角色数
    #[serde(default)]
    pub roles: i32,
    /// 角色名列表
    #[serde(default)]
    pub role_names: Vec<String>,
}

impl CoherenceClusterSpec {
    /// 集群中声明的角色；未声明任何角色时视为只有一个空角色
    pub fn role_specs(&self) -> Vec<CoherenceResourceSpec> {
        match &self.roles {
            Some(roles) if !roles.is_empty() => roles.clone(),
            _ => vec![CoherenceResourceSpec::default()],
        }
    }
}

impl CoherenceCluster {
    /// WKA 服务名
    pub fn wka_service_name(&self) -> String {
        format!("{}{}", self.name_any(), WKA_SERVICE_SUFFIX)
    }

    /// 角色对应的子部署名
    pub fn role_deployment_name(&self, role: &str) -> String {
        format!("{}-{}", self.name_any(), role)
    }
}
