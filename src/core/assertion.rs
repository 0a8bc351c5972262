use std::time::Duration;

use regex::Regex;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::core::json_path;
use crate::core::variable_store::render_value;
use crate::models::config::Assertion;

// 断言求值需要的响应快照
pub struct AssertionContext<'a> {
    pub status_code: u16,
    pub response_time: Duration,
    pub body: &'a [u8],
    pub headers: &'a HeaderMap,
}

// 单条断言的结论
#[derive(Clone, Debug)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub actual: Option<Value>,
    pub message: String,
}

impl AssertionOutcome {
    fn pass(actual: Option<Value>) -> Self {
        AssertionOutcome {
            passed: true,
            actual,
            message: String::new(),
        }
    }

    fn fail(actual: Option<Value>, message: String) -> Self {
        AssertionOutcome {
            passed: false,
            actual,
            message,
        }
    }
}

// 每条断言独立求值，互不影响
pub fn evaluate_all(assertions: &[Assertion], ctx: &AssertionContext) -> Vec<AssertionOutcome> {
    assertions.iter().map(|a| evaluate(a, ctx)).collect()
}

pub fn evaluate(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    match assertion.kind.as_str() {
        "json_path" => evaluate_json_path(assertion, ctx),
        "response_time" => evaluate_response_time(assertion, ctx),
        "status" => evaluate_status(assertion, ctx),
        "header" => evaluate_header(assertion, ctx),
        "body_size" => evaluate_body_size(assertion, ctx),
        other => AssertionOutcome::fail(None, format!("unknown assertion type: {}", other)),
    }
}

fn evaluate_json_path(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    // 空body只有not_exists能过
    if ctx.body.is_empty() {
        if assertion.operator == "not_exists" {
            return AssertionOutcome::pass(Some(Value::Bool(false)));
        }
        return AssertionOutcome::fail(None, "empty response body".to_string());
    }

    let parsed: Value = match serde_json::from_slice(ctx.body) {
        Ok(v) => v,
        Err(_) => {
            return AssertionOutcome::fail(None, "invalid JSON in response body".to_string())
        }
    };

    if assertion.operator == "exists" || assertion.operator == "not_exists" {
        let exists = json_path::exists(&parsed, &assertion.target);
        let actual = Some(Value::Bool(exists));
        return if assertion.operator == "exists" {
            if exists {
                AssertionOutcome::pass(actual)
            } else {
                AssertionOutcome::fail(
                    actual,
                    format!("path '{}' not found in response", assertion.target),
                )
            }
        } else if exists {
            AssertionOutcome::fail(
                actual,
                format!("path '{}' exists but should not", assertion.target),
            )
        } else {
            AssertionOutcome::pass(actual)
        };
    }

    let actual = match json_path::lookup(&parsed, &assertion.target) {
        Some(v) => v,
        None => {
            return AssertionOutcome::fail(
                None,
                format!("path '{}' not found in response", assertion.target),
            )
        }
    };

    match compare(&assertion.operator, &actual, &assertion.value) {
        Ok(true) => AssertionOutcome::pass(Some(actual)),
        Ok(false) => {
            let message = format!(
                "assertion failed: {} {} {}, got {}",
                assertion.target,
                assertion.operator,
                render_value(&assertion.value),
                render_value(&actual)
            );
            AssertionOutcome::fail(Some(actual), message)
        }
        Err(e) => AssertionOutcome::fail(Some(actual), e),
    }
}

fn evaluate_response_time(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    let actual = Some(Value::from(ctx.response_time.as_millis() as u64));

    let expected_str = match assertion.value.as_str() {
        Some(s) => s,
        None => {
            return AssertionOutcome::fail(
                actual,
                format!(
                    "invalid duration value: {} (expected string like '100ms')",
                    render_value(&assertion.value)
                ),
            )
        }
    };

    let expected = match humantime::parse_duration(expected_str) {
        Ok(d) => d,
        Err(e) => {
            return AssertionOutcome::fail(actual, format!("invalid duration format: {}", e))
        }
    };

    match compare_durations(&assertion.operator, ctx.response_time, expected) {
        Ok(true) => AssertionOutcome::pass(actual),
        Ok(false) => AssertionOutcome::fail(
            actual,
            format!(
                "response time assertion failed: {:?} {} {:?}",
                ctx.response_time, assertion.operator, expected
            ),
        ),
        Err(e) => AssertionOutcome::fail(actual, e),
    }
}

fn evaluate_status(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    let actual = Some(Value::from(ctx.status_code));

    if !assertion.value.is_number() {
        return AssertionOutcome::fail(
            actual,
            format!("invalid status code value: {}", render_value(&assertion.value)),
        );
    }

    match compare(
        &assertion.operator,
        &Value::from(ctx.status_code),
        &assertion.value,
    ) {
        Ok(true) => AssertionOutcome::pass(actual),
        Ok(false) => AssertionOutcome::fail(
            actual,
            format!(
                "status assertion failed: {} {} {}",
                ctx.status_code,
                assertion.operator,
                render_value(&assertion.value)
            ),
        ),
        Err(e) => AssertionOutcome::fail(actual, e),
    }
}

fn evaluate_header(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    // HeaderMap本身就是大小写不敏感的
    let header_value = ctx
        .headers
        .get(assertion.target.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let actual = Some(Value::String(header_value.clone()));

    if assertion.operator == "exists" || assertion.operator == "not_exists" {
        let exists = !header_value.is_empty();
        return if assertion.operator == "exists" {
            if exists {
                AssertionOutcome::pass(actual)
            } else {
                AssertionOutcome::fail(
                    actual,
                    format!("header '{}' not found", assertion.target),
                )
            }
        } else if exists {
            AssertionOutcome::fail(
                actual,
                format!("header '{}' exists but should not", assertion.target),
            )
        } else {
            AssertionOutcome::pass(actual)
        };
    }

    if header_value.is_empty() {
        return AssertionOutcome::fail(
            actual,
            format!("header '{}' not found", assertion.target),
        );
    }

    match compare(
        &assertion.operator,
        &Value::String(header_value.clone()),
        &assertion.value,
    ) {
        Ok(true) => AssertionOutcome::pass(actual),
        Ok(false) => AssertionOutcome::fail(
            actual,
            format!(
                "header assertion failed: {} {} {}, got '{}'",
                assertion.target,
                assertion.operator,
                render_value(&assertion.value),
                header_value
            ),
        ),
        Err(e) => AssertionOutcome::fail(actual, e),
    }
}

fn evaluate_body_size(assertion: &Assertion, ctx: &AssertionContext) -> AssertionOutcome {
    let size = ctx.body.len() as u64;
    let actual = Some(Value::from(size));

    if !assertion.value.is_number() {
        return AssertionOutcome::fail(
            actual,
            format!("invalid body size value: {}", render_value(&assertion.value)),
        );
    }

    match compare(&assertion.operator, &Value::from(size), &assertion.value) {
        Ok(true) => AssertionOutcome::pass(actual),
        Ok(false) => AssertionOutcome::fail(
            actual,
            format!(
                "body size assertion failed: {} {} {}",
                size,
                assertion.operator,
                render_value(&assertion.value)
            ),
        ),
        Err(e) => AssertionOutcome::fail(actual, e),
    }
}

// 按operator比较实际值和期望值
fn compare(operator: &str, actual: &Value, expected: &Value) -> Result<bool, String> {
    match operator {
        "eq" => Ok(equals(actual, expected)),
        "neq" => Ok(!equals(actual, expected)),
        "gt" => numeric_compare(actual, expected).map(|(a, b)| a > b),
        "gte" => numeric_compare(actual, expected).map(|(a, b)| a >= b),
        "lt" => numeric_compare(actual, expected).map(|(a, b)| a < b),
        "lte" => numeric_compare(actual, expected).map(|(a, b)| a <= b),
        "contains" => Ok(render_value(actual).contains(&render_value(expected))),
        "starts_with" => Ok(render_value(actual).starts_with(&render_value(expected))),
        "ends_with" => Ok(render_value(actual).ends_with(&render_value(expected))),
        "matches" => {
            let pattern = render_value(expected);
            let re = Regex::new(&pattern)
                .map_err(|e| format!("invalid regex pattern: {}", e))?;
            Ok(re.is_match(&render_value(actual)))
        }
        other => Err(format!("unknown operator: {}", other)),
    }
}

fn compare_durations(operator: &str, actual: Duration, expected: Duration) -> Result<bool, String> {
    match operator {
        "eq" => Ok(actual == expected),
        "neq" => Ok(actual != expected),
        "gt" => Ok(actual > expected),
        "gte" => Ok(actual >= expected),
        "lt" => Ok(actual < expected),
        "lte" => Ok(actual <= expected),
        other => Err(format!("unknown operator for duration: {}", other)),
    }
}

// 数值统一提升成f64比较，布尔直接比，剩下按字符串渲染比
fn equals(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (to_f64(actual), to_f64(expected)) {
        return a == b;
    }
    if let (Value::Bool(a), Value::Bool(b)) = (actual, expected) {
        return a == b;
    }
    render_value(actual) == render_value(expected)
}

fn numeric_compare(actual: &Value, expected: &Value) -> Result<(f64, f64), String> {
    match (to_f64(actual), to_f64(expected)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format!(
            "cannot compare non-numeric values: {}, {}",
            render_value(actual),
            render_value(expected)
        )),
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}
