use std::sync::Arc;
use std::time::{Instant, SystemTime};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::assertion::{self, AssertionContext};
use crate::core::comparison;
use crate::core::engine::Job;
use crate::core::extractor::Extractor;
use crate::core::substitutor::Substitutor;
use crate::models::result::{DebugLog, TestResult};

// 执行一次完整的http交换，产出一条TestResult
pub struct RequestExecutor {
    substitutor: Arc<Substitutor>,
    extractor: Arc<Extractor>,
    verbose: bool,
    log_tx: Option<UnboundedSender<DebugLog>>,
}

impl RequestExecutor {
    pub fn new(
        substitutor: Arc<Substitutor>,
        extractor: Arc<Extractor>,
        verbose: bool,
        log_tx: Option<UnboundedSender<DebugLog>>,
    ) -> Self {
        RequestExecutor {
            substitutor,
            extractor,
            verbose,
            log_tx,
        }
    }

    pub async fn execute(&self, job: &Job) -> TestResult {
        let test = &job.test;
        let global = &job.config.global;
        let timestamp = SystemTime::now();

        let mut result = TestResult::new(&test.name, &job.url, &test.method);
        result.timestamp = timestamp;

        // url和body先做变量替换
        let url = self.substitutor.substitute(&job.url);
        result.url = url.clone();

        let body = test.body.as_ref().map(|b| self.substitutor.substitute_body(b));
        let body_bytes = match &body {
            Some(value) => match serde_json::to_vec(value) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    result.error = format!("failed to serialize body: {}", e);
                    return result;
                }
            },
            None => None,
        };

        let timeout = test.effective_timeout(global);
        let skip_verify = test.effective_skip_verify(global);

        // 按生效的超时和tls配置建客户端
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        if skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                result.error = format!("failed to build http client: {}", e);
                return result;
            }
        };

        let method = match reqwest::Method::from_bytes(test.method.to_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                result.error = format!("invalid http method: {}", test.method);
                return result;
            }
        };

        // 全局header在前，用例header覆盖
        let mut headers = HeaderMap::new();
        for source in [&global.headers, &test.headers] {
            for (key, value) in source.iter() {
                let value = self.substitutor.substitute(value);
                if let (Ok(name), Ok(value)) =
                    (key.parse::<HeaderName>(), HeaderValue::from_str(&value))
                {
                    headers.insert(name, value);
                }
            }
        }
        if body_bytes.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        // verbose模式生成短id把请求和响应串起来
        let request_id = if self.verbose {
            Uuid::new_v4().to_string()[..8].to_string()
        } else {
            String::new()
        };

        if self.verbose {
            let mut log = DebugLog::new("request", &test.name, &request_id);
            log.method = test.method.to_uppercase();
            log.url = url.clone();
            for (name, value) in headers.iter() {
                if let Ok(v) = value.to_str() {
                    log.headers.insert(name.to_string(), v.to_string());
                }
            }
            if let Some(bytes) = &body_bytes {
                log.body = String::from_utf8_lossy(bytes).into_owned();
            }
            self.send_log(log);
        }

        let mut request = client.request(method, &url).headers(headers);
        if let Some(bytes) = &body_bytes {
            result.request_size = bytes.len() as u64;
            request = request.body(bytes.clone());
        }

        // 响应耗时从发出请求到body读完
        let start = Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                result.response_time = start.elapsed();
                result.error = e.to_string();
                return result;
            }
        };

        let status_code = response.status().as_u16();
        let response_headers = response.headers().clone();
        let response_body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                result.response_time = start.elapsed();
                result.status_code = status_code;
                result.error = format!("failed to read response body: {}", e);
                return result;
            }
        };
        let response_time = start.elapsed();

        result.status_code = status_code;
        result.response_time = response_time;
        result.response_size = response_body.len() as u64;

        if self.verbose {
            let mut log = DebugLog::new("response", &test.name, &request_id);
            log.status_code = status_code;
            for (name, value) in response_headers.iter() {
                if let Ok(v) = value.to_str() {
                    log.headers.insert(name.to_string(), v.to_string());
                }
            }
            log.body = String::from_utf8_lossy(&response_body).into_owned();
            log.response_time_ms = response_time.as_millis() as u64;
            self.send_log(log);
        }

        result.success = test.expected_status.contains(&status_code);
        if !result.success {
            result.error = if self.verbose {
                format!(
                    "Unexpected status code: {} (expected: {:?})\nResponse body: {}",
                    status_code,
                    test.expected_status,
                    String::from_utf8_lossy(&response_body)
                )
            } else {
                format!(
                    "Unexpected status code: {} (expected: {:?})",
                    status_code, test.expected_status
                )
            };
        }

        // 请求成功才做变量提取，单条规则出错就算用例失败
        if !test.extract.is_empty() && result.success {
            if let Err(e) =
                self.extractor
                    .extract(&test.extract, &response_body, &response_headers, status_code)
            {
                result.error = format!("Variable extraction failed: {}", e);
                result.success = false;
            }
        }

        if !test.assertions.is_empty() {
            let ctx = AssertionContext {
                status_code,
                response_time,
                body: &response_body,
                headers: &response_headers,
            };
            for outcome in assertion::evaluate_all(&test.assertions, &ctx) {
                if outcome.passed {
                    result.assertions_passed += 1;
                } else {
                    result.assertions_failed += 1;
                    result.assertion_errors.push(outcome.message);
                    result.success = false;
                }
            }
        }

        // 配了compare_with就打影子请求做对比
        if let Some(compare_config) = &test.compare_with {
            let outcome = comparison::run_comparison(
                test,
                global,
                compare_config,
                &self.substitutor,
                body.as_ref(),
                status_code,
                response_time,
                &response_body,
                &response_headers,
            )
            .await;

            if !outcome.success {
                result.success = false;
                if result.error.is_empty() {
                    result.error = if !outcome.error.is_empty() {
                        format!("comparison failed: {}", outcome.error)
                    } else {
                        format!(
                            "comparison failed: {} field diffs, {} failed assertions",
                            outcome.field_diffs.len(),
                            outcome
                                .assertion_results
                                .iter()
                                .filter(|r| !r.passed)
                                .count()
                        )
                    };
                }
            }
            result.comparison = Some(outcome);
        }

        result
    }

    fn send_log(&self, log: DebugLog) {
        if let Some(tx) = &self.log_tx {
            let _ = tx.send(log);
        }
    }
}
