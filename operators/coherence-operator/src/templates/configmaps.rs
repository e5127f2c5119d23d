//! 脚本与 Fluentd 配置 ConfigMap

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

use super::SynthesisContext;
use crate::crd::constants::*;

/// 成员启动脚本
const START_SCRIPT: &str = r#"#!/bin/sh
# 由 Operator 生成，请勿手工修改
set -e

CLASSPATH="${COH_UTILS_DIR:-/utils}/lib/*:${COH_APP_DIR:-/app}/lib/*:${COH_APP_DIR:-/app}/classes"
JAVA_OPTS="-Dcoherence.cluster=${COH_CLUSTER_NAME} -Dcoherence.role=${COH_ROLE}"
JAVA_OPTS="${JAVA_OPTS} -Dcoherence.wka=${COH_WKA} -Dcoherence.machine=${COH_MACHINE_NAME} -Dcoherence.member=${COH_MEMBER_NAME}"
JAVA_OPTS="${JAVA_OPTS} -Dcoherence.health.port=${COH_HEALTH_PORT}"
JAVA_OPTS="${JAVA_OPTS} -Djava.util.logging.config.file=${COH_LOGGING_CONFIG}"

if [ -n "${COH_LOG_LEVEL}" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.log.level=${COH_LOG_LEVEL}"
fi
if [ -n "${COH_CACHE_CONFIG}" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.cacheconfig=${COH_CACHE_CONFIG}"
fi
if [ -n "${COH_STORAGE_ENABLED}" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.distributed.localstorage=${COH_STORAGE_ENABLED}"
fi
if [ "${COH_PERSISTENCE_ENABLED}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.distributed.persistence-mode=active -Dcoherence.distributed.persistence.base.dir=/persistence"
fi
if [ "${COH_SNAPSHOT_ENABLED}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.distributed.persistence.snapshot.dir=/snapshot"
fi
if [ "${COH_MGMT_ENABLED}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.management.http=all -Dcoherence.management.http.port=${COH_MGMT_HTTP_PORT}"
fi
if [ "${COH_METRICS_ENABLED}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.metrics.http.enabled=true -Dcoherence.metrics.http.port=${COH_METRICS_PORT}"
fi
if [ -n "${COH_SITE_INFO_LOCATION}" ]; then
  SITE=$(wget -q -T 60 -O - "${COH_SITE_INFO_LOCATION}" || true)
  [ -n "${SITE}" ] && JAVA_OPTS="${JAVA_OPTS} -Dcoherence.site=${SITE}"
fi
if [ -n "${COH_RACK_INFO_LOCATION}" ]; then
  RACK=$(wget -q -T 60 -O - "${COH_RACK_INFO_LOCATION}" || true)
  [ -n "${RACK}" ] && JAVA_OPTS="${JAVA_OPTS} -Dcoherence.rack=${RACK}"
fi
if [ -n "${MAX_HEAP}" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Xms${MAX_HEAP} -Xmx${MAX_HEAP}"
fi
if [ "${JVM_USE_CONTAINER_LIMITS}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -XX:+UseContainerSupport"
fi
case "${JVM_GC_COLLECTOR}" in
  G1|g1) JAVA_OPTS="${JAVA_OPTS} -XX:+UseG1GC" ;;
  CMS|cms) JAVA_OPTS="${JAVA_OPTS} -XX:+UseConcMarkSweepGC" ;;
  Parallel|parallel) JAVA_OPTS="${JAVA_OPTS} -XX:+UseParallelGC" ;;
esac
if [ "${JVM_GC_LOGGING}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -verbose:gc -Xlog:gc*:file=/logs/gc-%p.log"
fi
if [ "${JVM_JMXMP_ENABLED}" = "true" ]; then
  JAVA_OPTS="${JAVA_OPTS} -Dcoherence.management=all -Dcoherence.management.remote=true -Dcoherence.jmxmp.port=${JVM_JMXMP_PORT}"
fi

MAIN_CLASS="${COH_MAIN_CLASS:-com.tangosol.net.DefaultCacheServer}"
exec java -cp "${CLASSPATH}" ${JAVA_OPTS} ${JVM_ARGS} "${MAIN_CLASS}" ${COH_MAIN_ARGS}
"#;

/// 默认日志配置
const LOGGING_PROPERTIES: &str = "handlers=java.util.logging.ConsoleHandler,java.util.logging.FileHandler
.level=INFO
java.util.logging.ConsoleHandler.level=INFO
java.util.logging.ConsoleHandler.formatter=java.util.logging.SimpleFormatter
java.util.logging.FileHandler.pattern=/logs/coherence-%g.log
java.util.logging.FileHandler.limit=10485760
java.util.logging.FileHandler.count=50
java.util.logging.FileHandler.formatter=java.util.logging.SimpleFormatter
java.util.logging.SimpleFormatter.format=%1$tY-%1$tm-%1$td %1$tH:%1$tM:%1$tS.%1$tL/%4$s %5$s%6$s%n
";

/// `<name>-scripts`
pub fn scripts_config_map(ctx: &SynthesisContext) -> ConfigMap {
    ConfigMap {
        metadata: ctx.metadata(format!("{}{}", ctx.name(), SCRIPTS_CONFIG_MAP_SUFFIX), COMPONENT_SCRIPTS),
        data: Some(BTreeMap::from([
            ("startCoherence.sh".to_string(), START_SCRIPT.to_string()),
            ("logging.properties".to_string(), LOGGING_PROPERTIES.to_string()),
        ])),
        ..Default::default()
    }
}

/// `<name>-efk-config`，只有启用 Fluentd 时才生成
pub fn efk_config_map(ctx: &SynthesisContext) -> Option<ConfigMap> {
    if !ctx.fluentd_enabled() {
        return None;
    }
    let tag = ctx
        .spec()
        .logging
        .as_ref()
        .and_then(|l| l.fluentd.as_ref())
        .and_then(|f| f.tag.clone());

    Some(ConfigMap {
        metadata: ctx.metadata(format!("{}{}", ctx.name(), EFK_CONFIG_MAP_SUFFIX), COMPONENT_EFK_CONFIG),
        data: Some(BTreeMap::from([(
            FLUENTD_CONFIG_FILE.to_string(),
            fluentd_config(&ctx.cluster(), &ctx.name(), ctx.spec().get_role_name(), tag.as_deref()),
        )])),
        ..Default::default()
    })
}

fn elasticsearch_match(pattern: &str, prefix: &str) -> String {
    format!(
        r##"<match {pattern}>
  @type elasticsearch
  host "#{{ENV['{host}']}}"
  port "#{{ENV['{port}']}}"
  user "#{{ENV['{user}']}}"
  password "#{{ENV['{password}']}}"
  logstash_format true
  logstash_prefix {prefix}
</match>
"##,
        host = ENV_ES_HOST,
        port = ENV_ES_PORT,
        user = ENV_ES_USER,
        password = ENV_ES_PASSWORD,
    )
}

fn fluentd_config(cluster: &str, deployment: &str, role: &str, tag: Option<&str>) -> String {
    let mut config = format!(
        r##"# Coherence fluentd configuration

<match fluent.**>
  @type null
</match>

<source>
  @type tail
  path /logs/coherence-*.log
  pos_file /tmp/coherence.log.pos
  read_from_head true
  tag coherence-cluster
  multiline_flush_interval 20s
  <parse>
    @type multiline
    format_firstline /^\d{{4}}-\d{{2}}-\d{{2}} \d{{2}}:\d{{2}}:\d{{2}}.\d{{3}}/
    format1 /^(?<time>\d{{4}}-\d{{2}}-\d{{2}} \d{{2}}:\d{{2}}:\d{{2}}.\d{{3}})\/(?<uptime>[0-9\.]+) (?<product>.+) <(?<level>[^\s]+)> \(thread=(?<thread>.+), member=(?<member>.+)\):[\S\s](?<log>.*)/
  </parse>
</source>

<filter coherence-cluster>
  @type record_transformer
  <record>
    cluster "{cluster}"
    deployment "{deployment}"
    role "{role}"
    host "#{{ENV['HOSTNAME']}}"
  </record>
</filter>

"##
    );
    config.push_str(&elasticsearch_match("coherence-cluster", "coherence-cluster"));
    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        config.push('\n');
        config.push_str(&elasticsearch_match(tag, tag));
    }
    config
}
