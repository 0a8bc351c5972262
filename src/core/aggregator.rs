use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use crate::models::result::TestResult;
use crate::models::summary::{EndpointSummary, Summary};

// 把TestResult流折叠成Summary
// 流结束后按执行模式调用finalize_flat或finalize_from_start
pub struct Aggregator {
    summary: Summary,
    all_times: Vec<Duration>,
    endpoint_times: HashMap<String, Vec<Duration>>,
    total_response_time: Duration,
    first_timestamp: Option<SystemTime>,
    last_timestamp: Option<SystemTime>,
    last_response_time: Duration,
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            summary: Summary::default(),
            all_times: Vec::new(),
            endpoint_times: HashMap::new(),
            total_response_time: Duration::ZERO,
            first_timestamp: None,
            last_timestamp: None,
            last_response_time: Duration::ZERO,
        }
    }

    pub fn add(&mut self, result: &TestResult) {
        let summary = &mut self.summary;
        summary.total_requests += 1;

        let endpoint = summary
            .endpoints
            .entry(result.test_name.clone())
            .or_insert_with(|| {
                EndpointSummary::new(&result.test_name, &result.url, result.timestamp)
            });
        endpoint.total_requests += 1;
        // 记录最早一次执行时间
        if result.timestamp < endpoint.first_executed_at {
            endpoint.first_executed_at = result.timestamp;
        }

        // 跳过的结果只计数，不进耗时和状态码统计
        if result.skipped {
            summary.skipped_requests += 1;
            endpoint.skipped_requests += 1;
            if !result.skip_reason.is_empty() {
                *summary.errors.entry(result.skip_reason.clone()).or_insert(0) += 1;
                endpoint.errors.push(result.skip_reason.clone());
            }
            return;
        }

        if result.success {
            summary.successful_requests += 1;
            endpoint.successful_requests += 1;
        } else {
            summary.failed_requests += 1;
            endpoint.failed_requests += 1;
            if !result.error.is_empty() {
                *summary.errors.entry(result.error.clone()).or_insert(0) += 1;
                endpoint.errors.push(result.error.clone());
            }
        }

        *summary.status_codes.entry(result.status_code).or_insert(0) += 1;
        *endpoint.status_codes.entry(result.status_code).or_insert(0) += 1;

        if summary.min_response_time.is_zero() || result.response_time < summary.min_response_time
        {
            summary.min_response_time = result.response_time;
        }
        if result.response_time > summary.max_response_time {
            summary.max_response_time = result.response_time;
        }

        summary.assertions_passed += result.assertions_passed as u64;
        summary.assertions_failed += result.assertions_failed as u64;
        summary.total_assertions +=
            (result.assertions_passed + result.assertions_failed) as u64;
        endpoint.assertions_passed += result.assertions_passed as u64;
        endpoint.assertions_failed += result.assertions_failed as u64;
        endpoint.total_assertions +=
            (result.assertions_passed + result.assertions_failed) as u64;

        if let Some(comparison) = &result.comparison {
            summary.total_comparisons += 1;
            endpoint.total_comparisons += 1;
            if comparison.success {
                summary.comparisons_passed += 1;
                endpoint.comparisons_passed += 1;
            } else {
                summary.comparisons_failed += 1;
                endpoint.comparisons_failed += 1;
            }
        }

        self.total_response_time += result.response_time;
        self.all_times.push(result.response_time);
        self.endpoint_times
            .entry(result.test_name.clone())
            .or_default()
            .push(result.response_time);

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(result.timestamp);
        }
        self.last_timestamp = Some(result.timestamp);
        self.last_response_time = result.response_time;
    }

    // flat模式: 首尾结果的时间差加最后一次响应耗时
    pub fn finalize_flat(mut self) -> Summary {
        let total_time = match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => {
                last.duration_since(first).unwrap_or(Duration::ZERO) + self.last_response_time
            }
            _ => Duration::ZERO,
        };
        self.finalize(total_time);
        self.summary
    }

    // DAG模式: 从run开始计墙钟
    pub fn finalize_from_start(mut self, run_start: Instant) -> Summary {
        let executed =
            self.summary.successful_requests + self.summary.failed_requests;
        let total_time = if executed > 0 {
            run_start.elapsed()
        } else {
            Duration::ZERO
        };
        self.finalize(total_time);
        self.summary
    }

    fn finalize(&mut self, total_time: Duration) {
        let executed = self.summary.successful_requests + self.summary.failed_requests;
        if executed == 0 {
            return;
        }

        self.summary.total_time = total_time;
        self.summary.avg_response_time = self.total_response_time / executed as u32;
        if !total_time.is_zero() {
            self.summary.requests_per_sec = executed as f64 / total_time.as_secs_f64();
        }

        self.all_times.sort();
        self.summary.p50_response_time = percentile(&self.all_times, 50.0);
        self.summary.p95_response_time = percentile(&self.all_times, 95.0);
        self.summary.p99_response_time = percentile(&self.all_times, 99.0);

        for (name, times) in self.endpoint_times.iter_mut() {
            if let Some(endpoint) = self.summary.endpoints.get_mut(name) {
                let total: Duration = times.iter().sum();
                endpoint.avg_response_time = total / times.len() as u32;
                times.sort();
                endpoint.p50_response_time = percentile(times, 50.0);
                endpoint.p95_response_time = percentile(times, 95.0);
                endpoint.p99_response_time = percentile(times, 99.0);
            }
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

// 已排序耗时序列上的线性插值百分位
pub fn percentile(sorted_times: &[Duration], percentile: f64) -> Duration {
    let n = sorted_times.len();
    if n == 0 {
        return Duration::ZERO;
    }

    let index = percentile * (n as f64 - 1.0) / 100.0;
    let lower = index.floor() as usize;
    let upper = lower + 1;

    if upper >= n {
        return sorted_times[n - 1];
    }
    if (lower as f64 - index).abs() < f64::EPSILON {
        return sorted_times[lower];
    }

    // 相邻两点线性插值
    let weight = index - lower as f64;
    let low = sorted_times[lower].as_secs_f64();
    let high = sorted_times[upper].as_secs_f64();
    Duration::from_secs_f64(low + weight * (high - low))
}
