use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::Value;

// 单次请求(或跳过)的观测记录，每个job产出一条
#[derive(Clone, Debug)]
pub struct TestResult {
    pub test_name: String,
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub response_time: Duration,
    pub success: bool,
    pub error: String,
    pub response_size: u64,
    pub request_size: u64,
    pub timestamp: SystemTime,
    pub assertions_passed: u32,
    pub assertions_failed: u32,
    pub assertion_errors: Vec<String>,
    pub skipped: bool,
    pub skip_reason: String,
    pub comparison: Option<ComparisonOutcome>,
}

impl TestResult {
    pub fn new(test_name: &str, url: &str, method: &str) -> Self {
        TestResult {
            test_name: test_name.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            status_code: 0,
            response_time: Duration::ZERO,
            success: false,
            error: String::new(),
            response_size: 0,
            request_size: 0,
            timestamp: SystemTime::now(),
            assertions_passed: 0,
            assertions_failed: 0,
            assertion_errors: Vec::new(),
            skipped: false,
            skip_reason: String::new(),
            comparison: None,
        }
    }
}

// 差异类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    // 主侧有、对比侧没有
    Missing,
    // 对比侧多出来的
    Extra,
    TypeMismatch,
    ValueMismatch,
}

// 一处字段差异
#[derive(Clone, Debug, Serialize)]
pub struct FieldDiff {
    pub path: String,
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_value: Option<Value>,
    pub message: String,
}

// 单条对比断言的结论
#[derive(Clone, Debug, Serialize)]
pub struct CompareAssertionResult {
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_value: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

// 影子请求对比的完整结论，附在TestResult上
#[derive(Clone, Debug, Serialize)]
pub struct ComparisonOutcome {
    pub success: bool,
    pub status_match: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub primary_status: u16,
    pub compare_status: u16,
    pub primary_response_time_ms: u64,
    pub compare_response_time_ms: u64,
    pub primary_body_size: u64,
    pub compare_body_size: u64,
    #[serde(skip)]
    pub primary_body: Vec<u8>,
    #[serde(skip)]
    pub compare_body: Vec<u8>,
    pub field_diffs: Vec<FieldDiff>,
    pub assertion_results: Vec<CompareAssertionResult>,
}

// verbose模式下按序落盘的请求/响应记录
#[derive(Clone, Debug, Serialize)]
pub struct DebugLog {
    pub timestamp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    // request或response
    pub kind: String,
    pub test_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "is_zero_status")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "is_zero_ms")]
    pub response_time_ms: u64,
}

fn is_zero_status(code: &u16) -> bool {
    *code == 0
}

fn is_zero_ms(ms: &u64) -> bool {
    *ms == 0
}

impl DebugLog {
    pub fn new(kind: &str, test_name: &str, request_id: &str) -> Self {
        DebugLog {
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            request_id: request_id.to_string(),
            kind: kind.to_string(),
            test_name: test_name.to_string(),
            method: String::new(),
            url: String::new(),
            status_code: 0,
            headers: std::collections::HashMap::new(),
            body: String::new(),
            response_time_ms: 0,
        }
    }
}
