//! 三路合并补丁
//!
//! 输入为 (上次期望, 当前实际, 新期望) 三份 JSON 文档：
//! - 新增与变更来自 当前 -> 新期望 的差异，忽略只存在于当前对象上的字段（由 API Server 写入的字段得以保留）；
//! - 删除来自 上次期望 -> 新期望 的差异，只删除 Operator 自己曾经写入的字段。
//!
//! 支持两种补丁格式：JSON merge patch（列表整体替换）和 strategic merge patch
//! （带合并键的列表按键合并，删除元素使用 `$patch: delete` 指令）。

use serde_json::{json, Map, Value};
use thiserror::Error;

/// 补丁类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// JSON merge patch (RFC 7386)
    Merge,
    /// Kubernetes strategic merge patch
    Strategic,
}

/// 补丁构造错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    /// 文档不是 JSON 对象
    #[error("补丁文档必须是 JSON 对象: {0}")]
    NotAnObject(&'static str),

    /// 该资源类型缺少 strategic merge 元数据
    #[error("资源类型 {0} 缺少 strategic merge 元数据")]
    MissingMetadata(String),
}

/// 无意义的补丁：新期望对象中没有这两个字段，而实际对象总有
pub fn ignore_patch() -> Value {
    json!({"metadata": {"creationTimestamp": null}, "status": {"replicas": 0}})
}

/// 构造三路合并补丁；补丁为空或等于忽略补丁时返回 None
pub fn three_way_patch(
    original: Option<&Value>,
    current: &Value,
    desired: &Value,
    patch_type: PatchType,
) -> Result<Option<Value>, PatchError> {
    if !current.is_object() {
        return Err(PatchError::NotAnObject("current"));
    }
    if !desired.is_object() {
        return Err(PatchError::NotAnObject("desired"));
    }
    if let Some(original) = original {
        if !original.is_object() {
            return Err(PatchError::NotAnObject("original"));
        }
    }

    let strategic = patch_type == PatchType::Strategic;
    let mut path = Vec::new();

    let additions = diff_additions(current, desired, strategic, &mut path);
    let deletions = match original {
        Some(original) => diff_deletions(original, desired, strategic, &mut path),
        None => Value::Object(Map::new()),
    };

    let patch = merge_patches(deletions, additions, strategic, &mut path);
    if is_empty(&patch) || patch == ignore_patch() {
        Ok(None)
    } else {
        Ok(Some(patch))
    }
}

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// strategic merge 列表的合并键
fn merge_key(path: &[String], field: &str) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes"
        | "imagePullSecrets" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        "volumeDevices" => Some("devicePath"),
        "hostAliases" => Some("ip"),
        "ownerReferences" => Some("uid"),
        "topologySpreadConstraints" => Some("topologyKey"),
        "ports" => {
            let in_container = path
                .iter()
                .any(|p| p == "containers" || p == "initContainers" || p == "ephemeralContainers");
            Some(if in_container { "containerPort" } else { "port" })
        }
        _ => None,
    }
}

/// 列表中所有元素都是含合并键的对象时才按键合并
fn keyed_list<'a>(items: &'a [Value], key: &str) -> Option<Vec<(&'a Value, &'a Value)>> {
    items
        .iter()
        .map(|item| item.get(key).map(|k| (k, item)))
        .collect()
}

/// 新增与变更：desired 中与 current 不同的部分
fn diff_additions(current: &Value, desired: &Value, strategic: bool, path: &mut Vec<String>) -> Value {
    let (Value::Object(current), Value::Object(desired)) = (current, desired) else {
        return desired.clone();
    };

    let mut patch = Map::new();
    for (field, d) in desired {
        if d.is_null() {
            continue;
        }
        match current.get(field) {
            None => {
                patch.insert(field.clone(), d.clone());
            }
            Some(c) if c == d => {}
            Some(c @ Value::Object(_)) if d.is_object() => {
                path.push(field.clone());
                let sub = diff_additions(c, d, strategic, path);
                path.pop();
                if !is_empty(&sub) {
                    patch.insert(field.clone(), sub);
                }
            }
            Some(Value::Array(c)) if strategic && d.is_array() => {
                path.push(field.clone());
                if let Some(sub) = diff_list_additions(field, c, d, path) {
                    patch.insert(field.clone(), sub);
                }
                path.pop();
            }
            Some(_) => {
                patch.insert(field.clone(), d.clone());
            }
        }
    }
    Value::Object(patch)
}

/// strategic 列表的新增与变更
fn diff_list_additions(field: &str, current: &[Value], desired: &Value, path: &mut Vec<String>) -> Option<Value> {
    let desired_items = desired.as_array()?;
    let key = match merge_key(&path[..path.len().saturating_sub(1)], field) {
        Some(key) => key,
        None => return Some(desired.clone()),
    };
    let (Some(current_keyed), Some(desired_keyed)) = (keyed_list(current, key), keyed_list(desired_items, key)) else {
        return Some(desired.clone());
    };

    let mut items = Vec::new();
    for (k, d) in desired_keyed {
        match current_keyed.iter().find(|(ck, _)| *ck == k) {
            None => items.push(d.clone()),
            Some((_, c)) => {
                let mut sub = diff_additions(c, d, true, path);
                if !is_empty(&sub) {
                    if let Value::Object(map) = &mut sub {
                        map.insert(key.to_string(), k.clone());
                    }
                    items.push(sub);
                }
            }
        }
    }

    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

/// 删除：original 中存在而 desired 中不存在的字段
fn diff_deletions(original: &Value, desired: &Value, strategic: bool, path: &mut Vec<String>) -> Value {
    let (Value::Object(original), Value::Object(desired)) = (original, desired) else {
        return Value::Object(Map::new());
    };

    let mut patch = Map::new();
    for (field, o) in original {
        match desired.get(field) {
            None | Some(Value::Null) => {
                patch.insert(field.clone(), Value::Null);
            }
            Some(d @ Value::Object(_)) if o.is_object() => {
                path.push(field.clone());
                let sub = diff_deletions(o, d, strategic, path);
                path.pop();
                if !is_empty(&sub) {
                    patch.insert(field.clone(), sub);
                }
            }
            Some(Value::Array(d)) if strategic && o.is_array() => {
                path.push(field.clone());
                if let Some(sub) = diff_list_deletions(field, o, d, path) {
                    patch.insert(field.clone(), sub);
                }
                path.pop();
            }
            Some(_) => {}
        }
    }
    Value::Object(patch)
}

/// strategic 列表的删除：被移除的元素生成 `$patch: delete` 指令
fn diff_list_deletions(field: &str, original: &Value, desired: &[Value], path: &mut Vec<String>) -> Option<Value> {
    let original_items = original.as_array()?;
    let key = merge_key(&path[..path.len().saturating_sub(1)], field)?;
    let original_keyed = keyed_list(original_items, key)?;
    let desired_keyed = keyed_list(desired, key)?;

    let mut items = Vec::new();
    for (k, o) in original_keyed {
        match desired_keyed.iter().find(|(dk, _)| *dk == k) {
            None => {
                let mut directive = Map::new();
                directive.insert("$patch".to_string(), Value::String("delete".to_string()));
                directive.insert(key.to_string(), k.clone());
                items.push(Value::Object(directive));
            }
            Some((_, d)) => {
                let mut sub = diff_deletions(o, d, true, path);
                if !is_empty(&sub) {
                    if let Value::Object(map) = &mut sub {
                        map.insert(key.to_string(), k.clone());
                    }
                    items.push(sub);
                }
            }
        }
    }

    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

/// 合并删除补丁与新增补丁，新增优先
fn merge_patches(base: Value, overlay: Value, strategic: bool, path: &mut Vec<String>) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (field, o) in overlay {
                let merged = match base.remove(&field) {
                    Some(b) => {
                        path.push(field.clone());
                        let merged = merge_field(&field, b, o, strategic, path);
                        path.pop();
                        merged
                    }
                    None => o,
                };
                base.insert(field, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn merge_field(field: &str, base: Value, overlay: Value, strategic: bool, path: &mut Vec<String>) -> Value {
    match (base, overlay) {
        (b @ Value::Object(_), o @ Value::Object(_)) => merge_patches(b, o, strategic, path),
        (Value::Array(b), Value::Array(o)) if strategic => {
            let key = match merge_key(&path[..path.len().saturating_sub(1)], field) {
                Some(key) => key,
                None => return Value::Array(o),
            };
            let mut merged = b;
            for item in o {
                let existing = item
                    .get(key)
                    .and_then(|k| merged.iter().position(|m| m.get(key) == Some(k)));
                match existing {
                    Some(idx) => {
                        let b = std::mem::take(&mut merged[idx]);
                        merged[idx] = merge_patches(b, item, strategic, path);
                    }
                    None => merged.push(item),
                }
            }
            Value::Array(merged)
        }
        (_, overlay) => overlay,
    }
}
