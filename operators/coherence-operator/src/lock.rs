//! 协调锁
//!
//! 进程内全局的 `key -> 占用` 集合，同一部署同一时刻最多只有一个协调在执行。
//! `try_lock` 从不等待，获取失败的请求直接重新入队。

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// 锁注册表
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

/// 锁守卫，离开作用域时释放
#[derive(Debug)]
pub struct LockGuard {
    registry: LockRegistry,
    key: String,
}

static GLOBAL: Lazy<LockRegistry> = Lazy::new(LockRegistry::default);

impl LockRegistry {
    /// 进程级共享注册表
    pub fn global() -> LockRegistry {
        GLOBAL.clone()
    }

    /// 尝试获取锁，已被占用时返回 None
    pub fn try_lock(&self, key: &str) -> Option<LockGuard> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.insert(key.to_string()) {
            trace!(key, "获取协调锁");
            Some(LockGuard {
                registry: self.clone(),
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }

    fn release(&self, key: &str) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(key);
        trace!(key, "释放协调锁");
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// 部署的锁键
pub fn lock_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
