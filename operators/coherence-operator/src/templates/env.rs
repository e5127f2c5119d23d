//! 容器环境变量

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, SecretKeySelector};

use super::SynthesisContext;
use crate::crd::constants::*;
use crate::merge::merge_named;

fn value(name: &str, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// coherence 容器的环境变量，用户声明的同名变量优先
pub fn coherence_env(ctx: &SynthesisContext) -> Vec<EnvVar> {
    let spec = ctx.spec();
    let coherence = spec.coherence.clone().unwrap_or_default();
    let jvm = spec.jvm.clone().unwrap_or_default();

    let mut env = vec![
        value(
            ENV_WKA,
            format!(
                "{}.{}.svc.cluster.local",
                ctx.deployment.wka_service_name(),
                ctx.namespace().unwrap_or_default()
            ),
        ),
        field_ref(ENV_MACHINE_NAME, "spec.nodeName"),
        field_ref(ENV_MEMBER_NAME, "metadata.name"),
        value(ENV_CLUSTER_NAME, ctx.cluster()),
        value(ENV_ROLE, spec.get_role_name()),
        EnvVar {
            name: ENV_OPERATOR_HOST.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(OPERATOR_CONFIG_NAME.to_string()),
                    key: OPERATOR_CONFIG_KEY_HOST.to_string(),
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        value(ENV_SITE_INFO, "http://$(OPERATOR_HOST)/site/$(COH_MACHINE_NAME)"),
        value(ENV_RACK_INFO, "http://$(OPERATOR_HOST)/rack/$(COH_MACHINE_NAME)"),
        value(ENV_HEALTH_PORT, spec.get_health_port()),
    ];

    if let Some(storage) = coherence.storage_enabled {
        env.push(value(ENV_STORAGE_ENABLED, storage));
    }
    if let Some(cache_config) = &coherence.cache_config {
        env.push(value(ENV_CACHE_CONFIG, cache_config));
    }

    // 日志
    if let Some(level) = coherence.log_level {
        env.push(value(ENV_LOG_LEVEL, level));
    }
    let logging_config = spec
        .logging
        .as_ref()
        .and_then(|l| l.config_file.clone())
        .unwrap_or_else(|| DEFAULT_LOGGING_CONFIG.to_string());
    env.push(value(ENV_LOGGING_CONFIG, logging_config));

    // 持久化
    if super::statefulset::storage_active(coherence.persistence.as_ref()) {
        env.push(value(ENV_PERSISTENCE_ENABLED, true));
    }
    if super::statefulset::storage_active(coherence.snapshot.as_ref()) {
        env.push(value(ENV_SNAPSHOT_ENABLED, true));
    }

    // 管理与指标
    let toggles = [
        (coherence.management.as_ref(), ENV_MGMT_ENABLED, ENV_MGMT_PORT, DEFAULT_MANAGEMENT_PORT),
        (coherence.metrics.as_ref(), ENV_METRICS_ENABLED, ENV_METRICS_PORT, DEFAULT_METRICS_PORT),
    ];
    for (toggle, enabled_name, port_name, default_port) in toggles {
        if let Some(toggle) = toggle {
            let enabled = toggle.enabled.unwrap_or(false);
            env.push(value(enabled_name, enabled));
            if enabled {
                env.push(value(port_name, toggle.port.unwrap_or(default_port)));
            }
        }
    }

    // JVM
    if let Some(heap) = &jvm.heap_size {
        env.push(value(ENV_MAX_HEAP, heap));
    }
    if let Some(args) = jvm.args.as_ref().filter(|a| !a.is_empty()) {
        env.push(value(ENV_JVM_ARGS, args.join(" ")));
    }
    if let Some(jmxmp) = &jvm.jmxmp {
        let enabled = jmxmp.enabled.unwrap_or(false);
        env.push(value(ENV_JMXMP_ENABLED, enabled));
        if enabled {
            env.push(value(ENV_JMXMP_PORT, jmxmp.port.unwrap_or(DEFAULT_JMXMP_PORT)));
        }
    }
    env.push(value(ENV_USE_CONTAINER_LIMITS, jvm.use_container_limits.unwrap_or(true)));
    if let Some(gc) = &jvm.gc {
        if let Some(collector) = &gc.collector {
            env.push(value(ENV_GC_COLLECTOR, collector));
        }
        if let Some(logging) = gc.logging {
            env.push(value(ENV_GC_LOGGING, logging));
        }
    }

    // 应用
    if let Some(app) = &spec.application {
        // 应用镜像的文件由初始化容器复制到工具目录下
        if app.image.is_some() {
            env.push(value(ENV_APP_DIR, APP_COPY_DIR));
        } else if let Some(dir) = &app.app_dir {
            env.push(value(ENV_APP_DIR, dir));
        }
        if let Some(main) = &app.main {
            env.push(value(ENV_APP_MAIN, main));
        }
        if let Some(args) = app.args.as_ref().filter(|a| !a.is_empty()) {
            env.push(value(ENV_APP_ARGS, args.join(" ")));
        }
    }
    env.push(value(ENV_UTILS_DIR, MOUNT_UTILS));

    merge_named(&spec.env, &Some(env), |e: &EnvVar| e.name.as_str()).unwrap_or_default()
}

/// Fluentd 边车的环境变量
pub fn fluentd_env(ctx: &SynthesisContext) -> Vec<EnvVar> {
    let flags = ctx.flags;
    let mut env = vec![
        value(ENV_FLUENTD_CLUSTER, ctx.cluster()),
        value(ENV_FLUENTD_ROLE, ctx.spec().get_role_name()),
        value(ENV_FLUENTD_CONF, FLUENTD_CONFIG_FILE),
        value(ENV_FLUENTD_SED_DISABLE, true),
    ];
    if let Some(host) = &flags.es_host {
        env.push(value(ENV_ES_HOST, host));
    }
    if let Some(port) = flags.es_port {
        env.push(value(ENV_ES_PORT, port));
    }
    if let Some(user) = &flags.es_user {
        env.push(value(ENV_ES_USER, user));
    }
    if let Some(password) = &flags.es_password {
        env.push(value(ENV_ES_PASSWORD, password));
    }
    env
}
