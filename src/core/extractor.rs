use std::sync::Arc;

use anyhow::{anyhow, Result};
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::core::json_path;
use crate::core::variable_store::VariableStore;

// 按规则把响应里的值写进变量表
pub struct Extractor {
    store: Arc<VariableStore>,
}

impl Extractor {
    pub fn new(store: Arc<VariableStore>) -> Self {
        Extractor { store }
    }

    // 逐条规则执行，取不到的静默跳过，未知source直接报错
    pub fn extract(
        &self,
        rules: &[crate::models::config::ExtractionRule],
        body: &[u8],
        headers: &HeaderMap,
        status_code: u16,
    ) -> Result<()> {
        for rule in rules {
            let value = match rule.source.as_str() {
                "body" => extract_from_body(body, &rule.path),
                "header" => extract_from_header(headers, &rule.path),
                "status" => Some(Value::from(status_code)),
                other => return Err(anyhow!("未知的提取source: {}", other)),
            };

            if let Some(value) = value {
                self.store.set(&rule.name, value);
            }
        }
        Ok(())
    }
}

// body走json路径，整数还原成整数存
fn extract_from_body(body: &[u8], path: &str) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_slice(body).ok()?;
    let value = json_path::lookup(&parsed, path)?;

    if let Value::Number(n) = &value {
        if let Some(f) = n.as_f64() {
            if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Some(Value::from(f as i64));
            }
        }
    }
    Some(value)
}

// 空header当不存在
fn extract_from_header(headers: &HeaderMap, name: &str) -> Option<Value> {
    let value = headers.get(name)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(Value::String(value.to_string()))
}
