use std::collections::HashSet;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::core::json_path;
use crate::core::substitutor::Substitutor;
use crate::core::variable_store::render_value;
use crate::models::config::{CompareAssertion, CompareConfig, GlobalConfig, TestCase};
use crate::models::result::{CompareAssertionResult, ComparisonOutcome, DiffKind, FieldDiff};

// 主请求和影子请求的响应快照
pub struct ComparisonContext {
    pub primary_status: u16,
    pub primary_response_time: Duration,
    pub primary_body: Vec<u8>,
    pub primary_headers: HeaderMap,
    pub compare_status: u16,
    pub compare_response_time: Duration,
    pub compare_body: Vec<u8>,
    pub compare_headers: HeaderMap,
}

// 对比求值器，持有ignore_fields和数组对比模式
pub struct Evaluator {
    ignore_fields: HashSet<String>,
    // full / partial / structural
    mode: String,
}

impl Evaluator {
    pub fn new(config: &CompareConfig) -> Self {
        let mode = if config.mode.is_empty() {
            "full".to_string()
        } else {
            config.mode.clone()
        };
        Evaluator {
            ignore_fields: config.ignore_fields.iter().cloned().collect(),
            mode,
        }
    }

    // 有断言逐条求值，没断言走全量body diff
    pub fn compare(
        &self,
        ctx: &ComparisonContext,
        assertions: &[CompareAssertion],
    ) -> ComparisonOutcome {
        let status_match = ctx.primary_status == ctx.compare_status;
        let mut outcome = ComparisonOutcome {
            success: true,
            status_match,
            error: String::new(),
            primary_status: ctx.primary_status,
            compare_status: ctx.compare_status,
            primary_response_time_ms: ctx.primary_response_time.as_millis() as u64,
            compare_response_time_ms: ctx.compare_response_time.as_millis() as u64,
            primary_body_size: ctx.primary_body.len() as u64,
            compare_body_size: ctx.compare_body.len() as u64,
            primary_body: ctx.primary_body.clone(),
            compare_body: ctx.compare_body.clone(),
            field_diffs: Vec::new(),
            assertion_results: Vec::new(),
        };

        // 状态码先看一眼
        if !status_match {
            outcome.success = false;
            outcome.field_diffs.push(FieldDiff {
                path: "_status_code".to_string(),
                kind: DiffKind::ValueMismatch,
                primary_value: Some(Value::from(ctx.primary_status)),
                compare_value: Some(Value::from(ctx.compare_status)),
                message: format!(
                    "Status code mismatch: primary={}, compare={}",
                    ctx.primary_status, ctx.compare_status
                ),
            });
        }

        if assertions.is_empty() {
            let diffs = self.compare_json_bodies(&ctx.primary_body, &ctx.compare_body);
            if !diffs.is_empty() {
                outcome.success = false;
            }
            outcome.field_diffs.extend(diffs);
        } else {
            for assertion in assertions {
                let result = self.evaluate_assertion(assertion, ctx);
                if !result.passed {
                    outcome.success = false;
                    // 字段类断言失败同时记一条diff，报告里能直接看到路径
                    if assertion.kind == "field_match" || assertion.kind == "field_tolerance" {
                        outcome.field_diffs.push(FieldDiff {
                            path: assertion.target.clone(),
                            kind: DiffKind::ValueMismatch,
                            primary_value: result.primary_value.clone(),
                            compare_value: result.compare_value.clone(),
                            message: result.message.clone(),
                        });
                    }
                }
                outcome.assertion_results.push(result);
            }
        }

        outcome
    }

    fn evaluate_assertion(
        &self,
        assertion: &CompareAssertion,
        ctx: &ComparisonContext,
    ) -> CompareAssertionResult {
        match assertion.kind.as_str() {
            "field_match" => self.evaluate_field_match(assertion, ctx),
            "field_tolerance" => self.evaluate_field_tolerance(assertion, ctx),
            "structure_match" => self.evaluate_structure_match(ctx),
            "status_match" => evaluate_status_match(ctx),
            "response_time_tolerance" => evaluate_response_time_tolerance(assertion, ctx),
            "header_match" => evaluate_header_match(assertion, ctx),
            other => CompareAssertionResult {
                kind: other.to_string(),
                target: assertion.target.clone(),
                passed: false,
                primary_value: None,
                compare_value: None,
                message: format!("unknown comparison type: {}", other),
            },
        }
    }

    fn evaluate_field_match(
        &self,
        assertion: &CompareAssertion,
        ctx: &ComparisonContext,
    ) -> CompareAssertionResult {
        let primary = body_value(&ctx.primary_body, &assertion.target);
        let compare = body_value(&ctx.compare_body, &assertion.target);

        let mut result = CompareAssertionResult {
            kind: assertion.kind.clone(),
            target: assertion.target.clone(),
            passed: false,
            primary_value: primary.clone(),
            compare_value: compare.clone(),
            message: String::new(),
        };

        match (&primary, &compare) {
            (None, None) => {
                result.passed = true;
                result.message = format!(
                    "field '{}' does not exist in either response",
                    assertion.target
                );
                return result;
            }
            (None, Some(_)) => {
                result.message =
                    format!("field '{}' missing in primary response", assertion.target);
                return result;
            }
            (Some(_), None) => {
                result.message =
                    format!("field '{}' missing in compare response", assertion.target);
                return result;
            }
            (Some(p), Some(c)) => {
                let operator = if assertion.operator.is_empty() {
                    "eq"
                } else {
                    assertion.operator.as_str()
                };
                result.passed = match operator {
                    "contains" => render_value(c).contains(&render_value(p)),
                    _ => values_equal(p, c),
                };
            }
        }

        if !result.passed {
            result.message = format!(
                "field '{}' mismatch: primary={}, compare={}",
                assertion.target,
                render_value(primary.as_ref().unwrap_or(&Value::Null)),
                render_value(compare.as_ref().unwrap_or(&Value::Null))
            );
        }
        result
    }

    fn evaluate_field_tolerance(
        &self,
        assertion: &CompareAssertion,
        ctx: &ComparisonContext,
    ) -> CompareAssertionResult {
        let primary = body_value(&ctx.primary_body, &assertion.target);
        let compare = body_value(&ctx.compare_body, &assertion.target);

        let mut result = CompareAssertionResult {
            kind: assertion.kind.clone(),
            target: assertion.target.clone(),
            passed: false,
            primary_value: primary.clone(),
            compare_value: compare.clone(),
            message: String::new(),
        };

        let (primary, compare) = match (primary, compare) {
            (Some(p), Some(c)) => (p, c),
            _ => {
                result.message = format!(
                    "field '{}' missing in one or both responses",
                    assertion.target
                );
                return result;
            }
        };

        let primary_num = primary.as_f64().unwrap_or(0.0);
        let compare_num = compare.as_f64().unwrap_or(0.0);
        let tolerance = parse_tolerance(&assertion.tolerance);

        if tolerance.is_percentage {
            // 主值为0时容差按对比值的绝对量级算
            let diff = if primary_num == 0.0 {
                compare_num.abs()
            } else {
                ((compare_num - primary_num) / primary_num).abs()
            };
            result.passed = diff <= tolerance.value;
            if !result.passed {
                result.message = format!(
                    "field '{}' exceeds tolerance: diff={:.2}%, tolerance={:.2}%",
                    assertion.target,
                    diff * 100.0,
                    tolerance.value * 100.0
                );
            }
        } else {
            let diff = (compare_num - primary_num).abs();
            result.passed = diff <= tolerance.value;
            if !result.passed {
                result.message = format!(
                    "field '{}' exceeds tolerance: diff={:.4}, tolerance={:.4}",
                    assertion.target, diff, tolerance.value
                );
            }
        }

        result
    }

    fn evaluate_structure_match(&self, ctx: &ComparisonContext) -> CompareAssertionResult {
        let mut result = CompareAssertionResult {
            kind: "structure_match".to_string(),
            target: String::new(),
            passed: false,
            primary_value: None,
            compare_value: None,
            message: String::new(),
        };

        let primary: Value = match serde_json::from_slice(&ctx.primary_body) {
            Ok(v) => v,
            Err(e) => {
                result.message = format!("failed to parse primary body: {}", e);
                return result;
            }
        };
        let compare: Value = match serde_json::from_slice(&ctx.compare_body) {
            Ok(v) => v,
            Err(e) => {
                result.message = format!("failed to parse compare body: {}", e);
                return result;
            }
        };

        result.passed = self.structures_match(&primary, &compare, "");
        if !result.passed {
            result.message = "JSON structure mismatch detected".to_string();
        }
        result
    }

    // 递归比较形状: 对象键集合一致，数组只看第一个元素的形状
    fn structures_match(&self, a: &Value, b: &Value, path: &str) -> bool {
        if self.is_ignored(path) {
            return true;
        }

        if value_kind(a) != value_kind(b) {
            return false;
        }

        match (a, b) {
            (Value::Object(a_map), Value::Object(b_map)) => {
                for key in a_map.keys() {
                    let child = join_path(path, key);
                    if !b_map.contains_key(key) && !self.is_ignored(&child) {
                        return false;
                    }
                    if let (Some(av), Some(bv)) = (a_map.get(key), b_map.get(key)) {
                        if !self.structures_match(av, bv, &child) {
                            return false;
                        }
                    }
                }
                for key in b_map.keys() {
                    let child = join_path(path, key);
                    if !a_map.contains_key(key) && !self.is_ignored(&child) {
                        return false;
                    }
                }
                true
            }
            (Value::Array(a_items), Value::Array(b_items)) => {
                if !a_items.is_empty() && !b_items.is_empty() {
                    return self.structures_match(
                        &a_items[0],
                        &b_items[0],
                        &format!("{}[0]", path),
                    );
                }
                true
            }
            _ => true,
        }
    }

    fn compare_json_bodies(&self, primary: &[u8], compare: &[u8]) -> Vec<FieldDiff> {
        let primary: Value = match serde_json::from_slice(primary) {
            Ok(v) => v,
            Err(_) => {
                return vec![FieldDiff {
                    path: String::new(),
                    kind: DiffKind::TypeMismatch,
                    primary_value: None,
                    compare_value: None,
                    message: "invalid primary JSON".to_string(),
                }]
            }
        };
        let compare: Value = match serde_json::from_slice(compare) {
            Ok(v) => v,
            Err(_) => {
                return vec![FieldDiff {
                    path: String::new(),
                    kind: DiffKind::TypeMismatch,
                    primary_value: None,
                    compare_value: None,
                    message: "invalid compare JSON".to_string(),
                }]
            }
        };

        self.compare_values(&primary, &compare, "")
    }

    // 递归全量diff，按mode决定数组怎么比
    fn compare_values(&self, primary: &Value, compare: &Value, path: &str) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();

        if self.is_ignored(path) {
            return diffs;
        }

        if value_kind(primary) != value_kind(compare) {
            diffs.push(FieldDiff {
                path: path.to_string(),
                kind: DiffKind::TypeMismatch,
                primary_value: Some(primary.clone()),
                compare_value: Some(compare.clone()),
                message: format!(
                    "type mismatch at '{}': primary={}, compare={}",
                    path,
                    value_kind(primary),
                    value_kind(compare)
                ),
            });
            return diffs;
        }

        match (primary, compare) {
            (Value::Object(p_map), Value::Object(c_map)) => {
                for (key, pv) in p_map {
                    let child = join_path(path, key);
                    match c_map.get(key) {
                        Some(cv) => diffs.extend(self.compare_values(pv, cv, &child)),
                        None => {
                            if !self.is_ignored(&child) {
                                diffs.push(FieldDiff {
                                    path: child.clone(),
                                    kind: DiffKind::Missing,
                                    primary_value: Some(pv.clone()),
                                    compare_value: None,
                                    message: format!(
                                        "field '{}' missing in compare response",
                                        child
                                    ),
                                });
                            }
                        }
                    }
                }
                // 对比侧多出来的键
                for (key, cv) in c_map {
                    let child = join_path(path, key);
                    if !p_map.contains_key(key) && !self.is_ignored(&child) {
                        diffs.push(FieldDiff {
                            path: child.clone(),
                            kind: DiffKind::Extra,
                            primary_value: None,
                            compare_value: Some(cv.clone()),
                            message: format!("field '{}' only in compare response", child),
                        });
                    }
                }
            }
            (Value::Array(p_items), Value::Array(c_items)) => {
                if self.mode == "structural" {
                    // structural模式只比第一个元素
                    if !p_items.is_empty() && !c_items.is_empty() {
                        diffs.extend(self.compare_values(
                            &p_items[0],
                            &c_items[0],
                            &format!("{}[0]", path),
                        ));
                    }
                } else {
                    let max_len = p_items.len().max(c_items.len());
                    for i in 0..max_len {
                        let elem_path = format!("{}[{}]", path, i);
                        match (p_items.get(i), c_items.get(i)) {
                            (Some(pv), Some(cv)) => {
                                diffs.extend(self.compare_values(pv, cv, &elem_path))
                            }
                            (Some(pv), None) => diffs.push(FieldDiff {
                                path: elem_path.clone(),
                                kind: DiffKind::Missing,
                                primary_value: Some(pv.clone()),
                                compare_value: None,
                                message: format!("missing element at '{}'", elem_path),
                            }),
                            (None, Some(cv)) => diffs.push(FieldDiff {
                                path: elem_path.clone(),
                                kind: DiffKind::Extra,
                                primary_value: None,
                                compare_value: Some(cv.clone()),
                                message: format!("extra element at '{}'", elem_path),
                            }),
                            (None, None) => {}
                        }
                    }
                }
            }
            _ => {
                if !values_equal(primary, compare) {
                    diffs.push(FieldDiff {
                        path: path.to_string(),
                        kind: DiffKind::ValueMismatch,
                        primary_value: Some(primary.clone()),
                        compare_value: Some(compare.clone()),
                        message: format!(
                            "value mismatch at '{}': primary={}, compare={}",
                            path,
                            render_value(primary),
                            render_value(compare)
                        ),
                    });
                }
            }
        }

        diffs
    }

    // 命中ignore_fields本身或任何父路径都算忽略
    fn is_ignored(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        if self.ignore_fields.contains(path) {
            return true;
        }
        let parts: Vec<&str> = path.split('.').collect();
        for i in 0..parts.len() {
            let parent = parts[..=i].join(".");
            if self.ignore_fields.contains(&parent) {
                return true;
            }
        }
        false
    }
}

fn evaluate_status_match(ctx: &ComparisonContext) -> CompareAssertionResult {
    let passed = ctx.primary_status == ctx.compare_status;
    CompareAssertionResult {
        kind: "status_match".to_string(),
        target: String::new(),
        passed,
        primary_value: Some(Value::from(ctx.primary_status)),
        compare_value: Some(Value::from(ctx.compare_status)),
        message: if passed {
            String::new()
        } else {
            format!(
                "status mismatch: primary={}, compare={}",
                ctx.primary_status, ctx.compare_status
            )
        },
    }
}

fn evaluate_response_time_tolerance(
    assertion: &CompareAssertion,
    ctx: &ComparisonContext,
) -> CompareAssertionResult {
    let tolerance = parse_tolerance(&assertion.tolerance);
    let primary_ms = ctx.primary_response_time.as_millis() as f64;
    let compare_ms = ctx.compare_response_time.as_millis() as f64;

    let diff = if tolerance.is_percentage {
        if primary_ms == 0.0 {
            compare_ms.abs()
        } else {
            ((compare_ms - primary_ms) / primary_ms).abs()
        }
    } else {
        (compare_ms - primary_ms).abs()
    };
    let passed = diff <= tolerance.value;

    CompareAssertionResult {
        kind: "response_time_tolerance".to_string(),
        target: String::new(),
        passed,
        primary_value: Some(Value::from(primary_ms)),
        compare_value: Some(Value::from(compare_ms)),
        message: if passed {
            String::new()
        } else {
            format!(
                "response time diff exceeds tolerance: primary={:?}, compare={:?}",
                ctx.primary_response_time, ctx.compare_response_time
            )
        },
    }
}

fn evaluate_header_match(
    assertion: &CompareAssertion,
    ctx: &ComparisonContext,
) -> CompareAssertionResult {
    let primary_val = header_string(&ctx.primary_headers, &assertion.target);
    let compare_val = header_string(&ctx.compare_headers, &assertion.target);

    let mut result = CompareAssertionResult {
        kind: assertion.kind.clone(),
        target: assertion.target.clone(),
        passed: false,
        primary_value: primary_val.clone().map(Value::String),
        compare_value: compare_val.clone().map(Value::String),
        message: String::new(),
    };

    let operator = if assertion.operator.is_empty() {
        "eq"
    } else {
        assertion.operator.as_str()
    };

    // exists只看对比侧
    if operator == "exists" {
        result.passed = compare_val.is_some();
        if !result.passed {
            result.message = format!(
                "header '{}' does not exist in compare response",
                assertion.target
            );
        }
        return result;
    }

    match (&primary_val, &compare_val) {
        (None, None) => {
            // 两边都没有算一致
            result.passed = true;
            result.message = format!(
                "header '{}' not present in either response",
                assertion.target
            );
        }
        (None, Some(_)) => {
            result.message = format!("header '{}' missing in primary response", assertion.target);
        }
        (Some(_), None) => {
            result.message = format!("header '{}' missing in compare response", assertion.target);
        }
        (Some(p), Some(c)) => {
            result.passed = match operator {
                "contains" => c.contains(p.as_str()),
                _ => p == c,
            };
            if !result.passed {
                result.message = format!(
                    "header '{}' mismatch: primary={}, compare={}",
                    assertion.target, p, c
                );
            }
        }
    }

    result
}

// 发影子请求并求对比结论
#[allow(clippy::too_many_arguments)]
pub async fn run_comparison(
    test: &TestCase,
    global: &GlobalConfig,
    compare_config: &CompareConfig,
    substitutor: &Substitutor,
    body: Option<&Value>,
    primary_status: u16,
    primary_response_time: Duration,
    primary_body: &[u8],
    primary_headers: &HeaderMap,
) -> ComparisonOutcome {
    let path = compare_config.path.as_deref().unwrap_or(&test.path);
    let url = substitutor.substitute(&format!(
        "{}/{}",
        compare_config.endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    ));

    let timeout = if !compare_config.timeout.is_zero() {
        compare_config.timeout
    } else {
        test.effective_timeout(global)
    };

    let failure = |message: String| ComparisonOutcome {
        success: false,
        status_match: false,
        error: message,
        primary_status,
        compare_status: 0,
        primary_response_time_ms: primary_response_time.as_millis() as u64,
        compare_response_time_ms: 0,
        primary_body_size: primary_body.len() as u64,
        compare_body_size: 0,
        primary_body: primary_body.to_vec(),
        compare_body: Vec::new(),
        field_diffs: Vec::new(),
        assertion_results: Vec::new(),
    };

    let mut builder = reqwest::Client::builder().timeout(timeout);
    if test.effective_skip_verify(global) {
        builder = builder.danger_accept_invalid_certs(true);
    }
    let client = match builder.build() {
        Ok(c) => c,
        Err(e) => return failure(format!("构建对比侧http客户端失败: {}", e)),
    };

    let method = match reqwest::Method::from_bytes(test.method.to_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => return failure(format!("无效的请求方法: {}", test.method)),
    };

    let mut request = client.request(method, &url);

    // 全局、用例、对比侧header依次合并，后者覆盖前者
    let mut headers = HeaderMap::new();
    for source in [&global.headers, &test.headers, &compare_config.headers] {
        for (key, value) in source.iter() {
            let value = substitutor.substitute(value);
            if let (Ok(name), Ok(value)) = (
                key.parse::<HeaderName>(),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
    }
    request = request.headers(headers);

    if let Some(body) = body {
        request = request.json(body);
    }

    let start = Instant::now();
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return failure(format!("对比侧请求失败: {}", e)),
    };

    let compare_status = response.status().as_u16();
    let compare_headers = response.headers().clone();
    let compare_body = match response.bytes().await {
        Ok(b) => b.to_vec(),
        Err(e) => return failure(format!("读取对比侧响应失败: {}", e)),
    };
    let compare_response_time = start.elapsed();

    let ctx = ComparisonContext {
        primary_status,
        primary_response_time,
        primary_body: primary_body.to_vec(),
        primary_headers: primary_headers.clone(),
        compare_status,
        compare_response_time,
        compare_body,
        compare_headers,
    };

    Evaluator::new(compare_config).compare(&ctx, &compare_config.assertions)
}

struct Tolerance {
    value: f64,
    is_percentage: bool,
}

// 容差解析: 小于1的数字或带%的字符串按百分比，其余按绝对值
fn parse_tolerance(value: &Value) -> Tolerance {
    match value {
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(0.0);
            if v > 0.0 && v < 1.0 {
                Tolerance {
                    value: v,
                    is_percentage: true,
                }
            } else {
                Tolerance {
                    value: v,
                    is_percentage: false,
                }
            }
        }
        Value::String(s) => {
            if let Some(pct) = s.strip_suffix('%') {
                Tolerance {
                    value: pct.trim().parse::<f64>().unwrap_or(0.0) / 100.0,
                    is_percentage: true,
                }
            } else {
                Tolerance {
                    value: s.trim().parse::<f64>().unwrap_or(0.0),
                    is_percentage: false,
                }
            }
        }
        _ => Tolerance {
            value: 0.0,
            is_percentage: false,
        },
    }
}

fn body_value(body: &[u8], path: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    json_path::lookup(&parsed, path)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// 数字按f64比，容器递归，其余直接比
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(primary: &str, compare: &str) -> ComparisonContext {
        ComparisonContext {
            primary_status: 200,
            primary_response_time: Duration::from_millis(100),
            primary_body: primary.as_bytes().to_vec(),
            primary_headers: HeaderMap::new(),
            compare_status: 200,
            compare_response_time: Duration::from_millis(110),
            compare_body: compare.as_bytes().to_vec(),
            compare_headers: HeaderMap::new(),
        }
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(&CompareConfig::default())
    }

    fn compare_assertion(kind: &str, target: &str, tolerance: Value) -> CompareAssertion {
        CompareAssertion {
            kind: kind.to_string(),
            target: target.to_string(),
            operator: String::new(),
            tolerance,
        }
    }

    #[test]
    fn field_match_exact() {
        let c = ctx(r#"{"name":"a"}"#, r#"{"name":"a"}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_match", "name", Value::Null)]);
        assert!(out.success);
        assert!(out.assertion_results[0].passed);
    }

    #[test]
    fn field_match_mismatch() {
        let c = ctx(r#"{"name":"a"}"#, r#"{"name":"b"}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_match", "name", Value::Null)]);
        assert!(!out.success);
        assert!(out.assertion_results[0].message.contains("mismatch"));
        // 失败同时产出一条diff
        assert_eq!(out.field_diffs.len(), 1);
        assert_eq!(out.field_diffs[0].path, "name");
    }

    #[test]
    fn field_match_nested_and_missing() {
        let c = ctx(r#"{"user":{"id":1}}"#, r#"{"user":{"id":1}}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_match", "user.id", Value::Null)]);
        assert!(out.success);

        let c = ctx(r#"{}"#, r#"{"name":"b"}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_match", "name", Value::Null)]);
        assert!(!out.success);
        assert!(out.assertion_results[0]
            .message
            .contains("missing in primary"));

        // 两边都没有算通过
        let c = ctx(r#"{}"#, r#"{}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_match", "name", Value::Null)]);
        assert!(out.success);
    }

    #[test]
    fn field_tolerance_percentage() {
        // 100对105，5%的偏差
        let c = ctx(r#"{"value":100}"#, r#"{"value":105}"#);
        let out = evaluator().compare(
            &c,
            &[compare_assertion("field_tolerance", "value", json!(0.10))],
        );
        assert!(out.success);

        let out = evaluator().compare(
            &c,
            &[compare_assertion("field_tolerance", "value", json!(0.02))],
        );
        assert!(!out.success);
        assert_eq!(out.field_diffs[0].path, "value");
        assert_eq!(out.field_diffs[0].kind, DiffKind::ValueMismatch);
    }

    #[test]
    fn field_tolerance_absolute() {
        let c = ctx(r#"{"count":100}"#, r#"{"count":103}"#);
        let out = evaluator().compare(
            &c,
            &[compare_assertion("field_tolerance", "count", json!(5))],
        );
        assert!(out.success);

        let out = evaluator().compare(
            &c,
            &[compare_assertion("field_tolerance", "count", json!(2))],
        );
        assert!(!out.success);
    }

    #[test]
    fn field_tolerance_string_percentage() {
        let c = ctx(r#"{"v":200}"#, r#"{"v":210}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_tolerance", "v", json!("10%"))]);
        assert!(out.success);
        let out = evaluator().compare(&c, &[compare_assertion("field_tolerance", "v", json!("1%"))]);
        assert!(!out.success);
    }

    #[test]
    fn status_match_assertion() {
        let mut c = ctx("{}", "{}");
        let out = evaluator().compare(&c, &[compare_assertion("status_match", "", Value::Null)]);
        assert!(out.success);

        c.compare_status = 500;
        let out = evaluator().compare(&c, &[compare_assertion("status_match", "", Value::Null)]);
        assert!(!out.success);
        assert!(!out.status_match);
        // 状态码不一致还会记一条_status_code diff
        assert!(out.field_diffs.iter().any(|d| d.path == "_status_code"));
    }

    #[test]
    fn structure_match_same_shape_different_values() {
        let c = ctx(r#"{"a":1,"b":{"c":"x"}}"#, r#"{"a":9,"b":{"c":"y"}}"#);
        let out = evaluator().compare(&c, &[compare_assertion("structure_match", "", Value::Null)]);
        assert!(out.success);
    }

    #[test]
    fn structure_match_detects_shape_change() {
        let c = ctx(r#"{"a":1}"#, r#"{"a":1,"extra":2}"#);
        let out = evaluator().compare(&c, &[compare_assertion("structure_match", "", Value::Null)]);
        assert!(!out.success);

        // 类型变了也算形状变了
        let c = ctx(r#"{"a":1}"#, r#"{"a":"1"}"#);
        let out = evaluator().compare(&c, &[compare_assertion("structure_match", "", Value::Null)]);
        assert!(!out.success);
    }

    #[test]
    fn structure_match_honors_ignore_fields() {
        let config = CompareConfig {
            ignore_fields: vec!["extra".to_string()],
            ..Default::default()
        };
        let c = ctx(r#"{"a":1}"#, r#"{"a":1,"extra":2}"#);
        let out = Evaluator::new(&config)
            .compare(&c, &[compare_assertion("structure_match", "", Value::Null)]);
        assert!(out.success);
    }

    #[test]
    fn response_time_tolerance() {
        let mut c = ctx("{}", "{}");
        c.primary_response_time = Duration::from_millis(100);
        c.compare_response_time = Duration::from_millis(120);
        // 绝对值容差30ms
        let out = evaluator().compare(
            &c,
            &[compare_assertion("response_time_tolerance", "", json!(30))],
        );
        assert!(out.success);
        let out = evaluator().compare(
            &c,
            &[compare_assertion("response_time_tolerance", "", json!(10))],
        );
        assert!(!out.success);
        // 百分比容差
        let out = evaluator().compare(
            &c,
            &[compare_assertion("response_time_tolerance", "", json!(0.25))],
        );
        assert!(out.success);
    }

    #[test]
    fn header_match_variants() {
        let mut c = ctx("{}", "{}");
        c.primary_headers
            .insert("X-Version", "v2".parse().unwrap());
        c.compare_headers
            .insert("x-version", "v2".parse().unwrap());

        let out = evaluator().compare(&c, &[compare_assertion("header_match", "X-Version", Value::Null)]);
        assert!(out.success);

        // 对比侧变了
        c.compare_headers
            .insert("x-version", "v3".parse().unwrap());
        let out = evaluator().compare(&c, &[compare_assertion("header_match", "X-Version", Value::Null)]);
        assert!(!out.success);

        // 两边都没有算一致
        let out = evaluator().compare(&c, &[compare_assertion("header_match", "X-Ghost", Value::Null)]);
        assert!(out.success);

        // exists只看对比侧
        let mut a = compare_assertion("header_match", "x-version", Value::Null);
        a.operator = "exists".to_string();
        let out = evaluator().compare(&c, &[a]);
        assert!(out.success);
    }

    #[test]
    fn full_diff_when_no_assertions() {
        let c = ctx(r#"{"same":1,"changed":"a","gone":true}"#, r#"{"same":1,"changed":"b","new":false}"#);
        let out = evaluator().compare(&c, &[]);
        assert!(!out.success);

        let kinds: Vec<_> = out.field_diffs.iter().map(|d| (d.path.as_str(), d.kind)).collect();
        assert!(kinds.contains(&("changed", DiffKind::ValueMismatch)));
        assert!(kinds.contains(&("gone", DiffKind::Missing)));
        assert!(kinds.contains(&("new", DiffKind::Extra)));
    }

    #[test]
    fn full_diff_identical_bodies_pass() {
        let c = ctx(r#"{"a":{"b":[1,2]}}"#, r#"{"a":{"b":[1,2]}}"#);
        let out = evaluator().compare(&c, &[]);
        assert!(out.success);
        assert!(out.field_diffs.is_empty());
    }

    #[test]
    fn full_diff_arrays_element_wise() {
        let c = ctx(r#"{"items":[1,2,3]}"#, r#"{"items":[1,9]}"#);
        let out = evaluator().compare(&c, &[]);
        let paths: Vec<_> = out.field_diffs.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"items[1]"));
        assert!(paths.contains(&"items[2]"));
    }

    #[test]
    fn structural_mode_only_compares_first_element() {
        let config = CompareConfig {
            mode: "structural".to_string(),
            ..Default::default()
        };
        let c = ctx(r#"{"items":[{"id":1},{"id":2}]}"#, r#"{"items":[{"id":1},{"id":99}]}"#);
        let out = Evaluator::new(&config).compare(&c, &[]);
        assert!(out.success);
    }

    #[test]
    fn ignore_fields_prune_diff() {
        let config = CompareConfig {
            ignore_fields: vec!["meta.request_id".to_string()],
            ..Default::default()
        };
        let c = ctx(
            r#"{"v":1,"meta":{"request_id":"a"}}"#,
            r#"{"v":1,"meta":{"request_id":"b"}}"#,
        );
        let out = Evaluator::new(&config).compare(&c, &[]);
        assert!(out.success);
    }

    #[test]
    fn ignored_parent_prunes_children() {
        let config = CompareConfig {
            ignore_fields: vec!["meta".to_string()],
            ..Default::default()
        };
        let c = ctx(
            r#"{"v":1,"meta":{"a":1,"b":2}}"#,
            r#"{"v":1,"meta":{"a":9}}"#,
        );
        let out = Evaluator::new(&config).compare(&c, &[]);
        assert!(out.success);
    }

    #[test]
    fn tolerance_parsing() {
        let t = parse_tolerance(&json!(0.1));
        assert!(t.is_percentage);
        assert!((t.value - 0.1).abs() < 1e-9);

        let t = parse_tolerance(&json!(5));
        assert!(!t.is_percentage);
        assert_eq!(t.value, 5.0);

        let t = parse_tolerance(&json!("15%"));
        assert!(t.is_percentage);
        assert!((t.value - 0.15).abs() < 1e-9);

        let t = parse_tolerance(&json!("2.5"));
        assert!(!t.is_percentage);
        assert!((t.value - 2.5).abs() < 1e-9);
    }

    #[test]
    fn zero_primary_treats_percentage_as_absolute_magnitude() {
        let c = ctx(r#"{"v":0}"#, r#"{"v":0.05}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_tolerance", "v", json!(0.10))]);
        assert!(out.success);
        let c = ctx(r#"{"v":0}"#, r#"{"v":3}"#);
        let out = evaluator().compare(&c, &[compare_assertion("field_tolerance", "v", json!(0.10))]);
        assert!(!out.success);
    }

    #[test]
    fn unknown_comparison_kind_fails() {
        let c = ctx("{}", "{}");
        let out = evaluator().compare(&c, &[compare_assertion("quantum_match", "", Value::Null)]);
        assert!(!out.success);
        assert!(out.assertion_results[0]
            .message
            .contains("unknown comparison type"));
    }
}
