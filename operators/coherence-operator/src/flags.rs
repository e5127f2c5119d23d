//! Operator 命令行参数与配置
//!
//! 配置优先级：命令行参数 > 环境变量 > 配置文件 > 内置默认值。
//! 解析后的 `OperatorFlags` 在启动后不再改变，以引用的方式传给模板层。

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::crd::constants::{DEFAULT_FLUENTD_IMAGE, DEFAULT_TOPOLOGY_LABEL};
use crate::patch::PatchType;

/// 默认 ReST 绑定地址
pub const DEFAULT_REST_HOST: &str = "0.0.0.0";
/// 默认 ReST 端口
pub const DEFAULT_REST_PORT: u16 = 8000;

/// 命令行参数
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "coherence-operator", version, about = "Coherence Kubernetes Operator")]
pub struct Cli {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(long)]
    pub config: Option<String>,
    /// ReST 服务绑定地址
    #[arg(long = "rest-host")]
    pub rest_host: Option<String>,
    /// ReST 服务端口
    #[arg(long = "rest-port")]
    pub rest_port: Option<u16>,
    /// Pod 访问 Operator 时使用的主机名
    #[arg(long = "service-name")]
    pub service_name: Option<String>,
    /// Pod 访问 Operator 时使用的端口，-1 表示与 rest-port 相同
    #[arg(long = "service-port", allow_hyphen_values = true)]
    pub service_port: Option<i32>,
    /// 默认启用日志采集边车
    #[arg(long = "log-integration")]
    pub log_integration: Option<bool>,
    #[arg(long = "es-host")]
    pub es_host: Option<String>,
    #[arg(long = "es-port")]
    pub es_port: Option<u16>,
    #[arg(long = "es-user")]
    pub es_user: Option<String>,
    #[arg(long = "es-password")]
    pub es_password: Option<String>,
    /// 默认 Coherence 镜像
    #[arg(long = "coherence-image", env = "COHERENCE_IMAGE")]
    pub coherence_image: Option<String>,
    /// 默认工具镜像
    #[arg(long = "utils-image", env = "UTILS_IMAGE")]
    pub utils_image: Option<String>,
    /// 默认 Fluentd 镜像
    #[arg(long = "fluentd-image")]
    pub fluentd_image: Option<String>,
    #[arg(long = "ssl-key-file")]
    pub ssl_key_file: Option<String>,
    #[arg(long = "ssl-cert-file")]
    pub ssl_cert_file: Option<String>,
    #[arg(long = "ssl-ca-file")]
    pub ssl_ca_file: Option<String>,
    /// 用于获取站点信息的节点标签
    #[arg(long = "site-label")]
    pub site_label: Option<String>,
    /// 用于获取机架信息的节点标签
    #[arg(long = "rack-label")]
    pub rack_label: Option<String>,
    /// 逗号分隔的镜像标签后缀，匹配时强制 imagePullPolicy=Always
    #[arg(long = "force-always-pull-tags")]
    pub force_always_pull_tags: Option<String>,
    /// 使用 strategic merge patch 而不是 JSON merge patch
    #[arg(long = "use-strategic-patch", env = "USE_STRATEGIC_PATCH")]
    pub use_strategic_patch: Option<bool>,
    /// 只监听指定命名空间，未设置时监听所有命名空间
    #[arg(long = "watch-namespace", env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
    /// 以 JSON 格式输出日志
    #[arg(long = "log-json", default_value_t = false)]
    pub log_json: bool,
}

/// 解析后的 Operator 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorFlags {
    pub rest_host: String,
    pub rest_port: u16,
    pub service_name: Option<String>,
    pub service_port: i32,
    pub log_integration: bool,
    pub es_host: Option<String>,
    pub es_port: Option<u16>,
    pub es_user: Option<String>,
    pub es_password: Option<String>,
    pub coherence_image: Option<String>,
    pub utils_image: Option<String>,
    pub fluentd_image: String,
    pub ssl_key_file: Option<String>,
    pub ssl_cert_file: Option<String>,
    pub ssl_ca_file: Option<String>,
    pub site_label: String,
    pub rack_label: String,
    pub force_always_pull_tags: Vec<String>,
    pub use_strategic_patch: bool,
    pub watch_namespace: Option<String>,
}

impl Default for OperatorFlags {
    fn default() -> Self {
        Self {
            rest_host: DEFAULT_REST_HOST.to_string(),
            rest_port: DEFAULT_REST_PORT,
            service_name: None,
            service_port: -1,
            log_integration: false,
            es_host: None,
            es_port: None,
            es_user: None,
            es_password: None,
            coherence_image: None,
            utils_image: None,
            fluentd_image: DEFAULT_FLUENTD_IMAGE.to_string(),
            ssl_key_file: None,
            ssl_cert_file: None,
            ssl_ca_file: None,
            site_label: DEFAULT_TOPOLOGY_LABEL.to_string(),
            rack_label: DEFAULT_TOPOLOGY_LABEL.to_string(),
            force_always_pull_tags: Vec::new(),
            use_strategic_patch: false,
            watch_namespace: None,
        }
    }
}

impl OperatorFlags {
    /// 按优先级加载配置
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&OperatorFlags::default()).context("加载默认配置失败")?);

        if let Some(path) = &cli.config {
            let format = match Path::new(path).extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON: {}", path)),
            };
            builder = builder.add_source(File::with_name(path).format(format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("COHERENCE_OPERATOR")
                    .list_separator(",")
                    .with_list_parse_key("force_always_pull_tags")
                    .try_parsing(true),
            )
            .build()
            .context("构建配置失败")?;

        let mut flags = config
            .try_deserialize::<OperatorFlags>()
            .context("配置格式错误")?;
        flags.apply_cli(cli);
        flags.validate()?;
        Ok(flags)
    }

    /// 命令行参数覆盖配置文件中的值
    fn apply_cli(&mut self, cli: &Cli) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut self.rest_host, &cli.rest_host);
        set(&mut self.rest_port, &cli.rest_port);
        set_opt(&mut self.service_name, &cli.service_name);
        set(&mut self.service_port, &cli.service_port);
        set(&mut self.log_integration, &cli.log_integration);
        set_opt(&mut self.es_host, &cli.es_host);
        set_opt(&mut self.es_port, &cli.es_port);
        set_opt(&mut self.es_user, &cli.es_user);
        set_opt(&mut self.es_password, &cli.es_password);
        set_opt(&mut self.coherence_image, &cli.coherence_image);
        set_opt(&mut self.utils_image, &cli.utils_image);
        set(&mut self.fluentd_image, &cli.fluentd_image);
        set_opt(&mut self.ssl_key_file, &cli.ssl_key_file);
        set_opt(&mut self.ssl_cert_file, &cli.ssl_cert_file);
        set_opt(&mut self.ssl_ca_file, &cli.ssl_ca_file);
        set(&mut self.site_label, &cli.site_label);
        set(&mut self.rack_label, &cli.rack_label);
        set(&mut self.use_strategic_patch, &cli.use_strategic_patch);
        set_opt(&mut self.watch_namespace, &cli.watch_namespace);

        if let Some(tags) = &cli.force_always_pull_tags {
            self.force_always_pull_tags = parse_tag_list(tags);
        }
        if self.service_name.as_deref() == Some("") {
            self.service_name = None;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.service_port < -1 || self.service_port == 0 || self.service_port > 65535 {
            return Err(anyhow!("service-port 无效: {}", self.service_port));
        }
        for file in [&self.ssl_key_file, &self.ssl_cert_file, &self.ssl_ca_file]
            .into_iter()
            .flatten()
        {
            if !Path::new(file).exists() {
                return Err(anyhow!("TLS 文件不存在: {}", file));
            }
        }
        Ok(())
    }

    /// 补丁类型开关
    pub fn patch_type(&self) -> PatchType {
        if self.use_strategic_patch {
            PatchType::Strategic
        } else {
            PatchType::Merge
        }
    }

    /// 镜像标签是否要求总是拉取
    pub fn force_always_pull(&self, image: &str) -> bool {
        let tag = match image.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => tag,
            _ => return false,
        };
        self.force_always_pull_tags
            .iter()
            .any(|suffix| !suffix.is_empty() && tag.ends_with(suffix.as_str()))
    }
}

/// 解析逗号分隔的标签后缀列表
pub fn parse_tag_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let flags = OperatorFlags::load(&Cli::default()).unwrap();
        assert_eq!(flags.rest_host, "0.0.0.0");
        assert_eq!(flags.rest_port, 8000);
        assert_eq!(flags.service_port, -1);
        assert_eq!(flags.site_label, DEFAULT_TOPOLOGY_LABEL);
        assert_eq!(flags.patch_type(), PatchType::Merge);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "rest_port: 9000\nsite_label: topology.kubernetes.io/zone\nservice_name: from-file").unwrap();

        let cli = Cli::parse_from([
            "coherence-operator",
            "--config",
            file.path().to_str().unwrap(),
            "--service-name",
            "coherence-operator-rest",
            "--service-port",
            "-1",
            "--force-always-pull-tags",
            "-SNAPSHOT, latest",
        ]);
        let flags = OperatorFlags::load(&cli).unwrap();
        assert_eq!(flags.rest_port, 9000);
        assert_eq!(flags.site_label, "topology.kubernetes.io/zone");
        assert_eq!(flags.service_name.as_deref(), Some("coherence-operator-rest"));
        assert_eq!(flags.force_always_pull_tags, vec!["-SNAPSHOT", "latest"]);
    }

    #[test]
    fn test_unsupported_config_format() {
        let cli = Cli {
            config: Some("operator.toml".into()),
            ..Default::default()
        };
        assert!(OperatorFlags::load(&cli).is_err());
    }

    #[test]
    fn test_force_always_pull() {
        let flags = OperatorFlags {
            force_always_pull_tags: parse_tag_list("-SNAPSHOT,latest"),
            ..Default::default()
        };
        assert!(flags.force_always_pull("coherence:14.1.1-SNAPSHOT"));
        assert!(flags.force_always_pull("registry:5000/coherence:latest"));
        assert!(!flags.force_always_pull("coherence:14.1.1"));
        assert!(!flags.force_always_pull("registry:5000/coherence"));
    }

    #[test]
    fn test_strategic_patch_toggle() {
        let flags = OperatorFlags {
            use_strategic_patch: true,
            ..Default::default()
        };
        assert_eq!(flags.patch_type(), PatchType::Strategic);
    }
}
