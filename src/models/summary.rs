use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::models::result::DebugLog;

// 聚合器产出的整体结论
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub skipped_requests: u64,
    pub total_time: Duration,
    pub avg_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
    pub p50_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
    pub requests_per_sec: f64,
    // {状态码: 次数}
    pub status_codes: HashMap<u16, u64>,
    // {错误信息: 次数}
    pub errors: HashMap<String, u64>,
    pub endpoints: HashMap<String, EndpointSummary>,
    pub total_assertions: u64,
    pub assertions_passed: u64,
    pub assertions_failed: u64,
    pub total_comparisons: u64,
    pub comparisons_passed: u64,
    pub comparisons_failed: u64,
    pub debug_logs: Vec<DebugLog>,
}

impl Summary {
    // 有失败请求或者run级错误都算整体失败
    pub fn is_success(&self) -> bool {
        self.failed_requests == 0 && self.errors.is_empty()
    }
}

// 按用例名聚合的小结
#[derive(Clone, Debug)]
pub struct EndpointSummary {
    pub name: String,
    pub url: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub skipped_requests: u64,
    pub avg_response_time: Duration,
    pub p50_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
    pub status_codes: HashMap<u16, u64>,
    pub errors: Vec<String>,
    pub total_assertions: u64,
    pub assertions_passed: u64,
    pub assertions_failed: u64,
    pub total_comparisons: u64,
    pub comparisons_passed: u64,
    pub comparisons_failed: u64,
    // 首次执行时间，报告按它排序展示
    pub first_executed_at: SystemTime,
}

impl EndpointSummary {
    pub fn new(name: &str, url: &str, first_executed_at: SystemTime) -> Self {
        EndpointSummary {
            name: name.to_string(),
            url: url.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            skipped_requests: 0,
            avg_response_time: Duration::ZERO,
            p50_response_time: Duration::ZERO,
            p95_response_time: Duration::ZERO,
            p99_response_time: Duration::ZERO,
            status_codes: HashMap::new(),
            errors: Vec::new(),
            total_assertions: 0,
            assertions_passed: 0,
            assertions_failed: 0,
            total_comparisons: 0,
            comparisons_passed: 0,
            comparisons_failed: 0,
            first_executed_at,
        }
    }
}
