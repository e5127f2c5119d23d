//! 本地网络地址发现
//!
//! 当 Operator 绑定在通配地址上且没有配置服务名时，需要找出一个
//! Pod 可以访问到的本地 IPv4 地址。

use std::fs;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::{Error, Result};

/// 候选网络接口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCandidate {
    /// 接口名称
    pub name: String,
    /// IPv4 地址
    pub ip: Ipv4Addr,
    /// 接口 MTU，无法读取时为 None
    pub mtu: Option<u32>,
    /// 接口是否处于 up 状态
    pub up: bool,
}

/// 从候选列表中选出最合适的地址
///
/// 跳过回环地址和未启用的接口，在剩余接口中取 MTU 最大者；
/// MTU 相同时按接口名排序以保证结果稳定。
pub fn select_address(candidates: &[InterfaceCandidate]) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .filter(|c| c.up && !c.ip.is_loopback() && !c.ip.is_unspecified())
        .max_by(|a, b| {
            a.mtu
                .unwrap_or(0)
                .cmp(&b.mtu.unwrap_or(0))
                .then_with(|| b.name.cmp(&a.name))
        })
        .map(|c| c.ip)
}

/// 获取本机非回环 IPv4 地址
pub fn local_address() -> Result<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs()?;

    let candidates: Vec<InterfaceCandidate> = interfaces
        .into_iter()
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(ref v4) => Some(InterfaceCandidate {
                mtu: read_mtu(&iface.name),
                up: is_up(&iface.name),
                ip: v4.ip,
                name: iface.name.clone(),
            }),
            _ => None,
        })
        .collect();

    debug!("本地网络接口候选: {:?}", candidates);

    select_address(&candidates)
        .ok_or_else(|| Error::Network("没有可用的非回环 IPv4 地址".to_string()))
}

fn read_mtu(name: &str) -> Option<u32> {
    fs::read_to_string(format!("/sys/class/net/{name}/mtu"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn is_up(name: &str) -> bool {
    match fs::read_to_string(format!("/sys/class/net/{name}/operstate")) {
        Ok(state) => matches!(state.trim(), "up" | "unknown"),
        // 非 Linux 平台没有 sysfs
        Err(_) => true,
    }
}
