use std::collections::BTreeMap;
use std::time::Duration;

use prettytable::{format, row, Table};
use serde::Serialize;

use crate::models::result::DebugLog;
use crate::models::summary::{EndpointSummary, Summary};

// ========== text报告 ==========

pub fn print_text_report(summary: &Summary) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);

    let success_rate = if summary.total_requests > 0 {
        summary.successful_requests as f64 / summary.total_requests as f64 * 100.0
    } else {
        0.0
    };

    table.add_row(row!["指标", "值"]);
    table.add_row(row!["总请求数", format!("{}", summary.total_requests)]);
    table.add_row(row![
        "成功",
        format!("{} ({:.1}%)", summary.successful_requests, success_rate)
    ]);
    table.add_row(row!["失败", format!("{}", summary.failed_requests)]);
    if summary.skipped_requests > 0 {
        table.add_row(row!["跳过", format!("{}", summary.skipped_requests)]);
    }
    table.add_row(row!["RPS", format!("{:.3}", summary.requests_per_sec)]);
    table.add_row(row!["总耗时", fmt_duration(summary.total_time)]);
    table.add_row(row!["平均响应时间", fmt_duration(summary.avg_response_time)]);
    table.add_row(row!["最小响应时间", fmt_duration(summary.min_response_time)]);
    table.add_row(row!["最大响应时间", fmt_duration(summary.max_response_time)]);
    table.add_row(row!["P50响应时间", fmt_duration(summary.p50_response_time)]);
    table.add_row(row!["P95响应时间", fmt_duration(summary.p95_response_time)]);
    table.add_row(row!["P99响应时间", fmt_duration(summary.p99_response_time)]);
    if summary.total_assertions > 0 {
        table.add_row(row![
            "断言",
            format!(
                "{}通过 / {}失败",
                summary.assertions_passed, summary.assertions_failed
            )
        ]);
    }
    if summary.total_comparisons > 0 {
        table.add_row(row![
            "对比",
            format!(
                "{}通过 / {}失败",
                summary.comparisons_passed, summary.comparisons_failed
            )
        ]);
    }
    println!("测试结果:");
    table.printstd();

    if !summary.status_codes.is_empty() {
        let mut codes: Vec<_> = summary.status_codes.iter().collect();
        codes.sort_by_key(|(code, _)| **code);

        let mut status_table = Table::new();
        status_table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        status_table.add_row(row!["状态码", "次数", "占比"]);
        for (code, count) in codes {
            let pct = *count as f64 / summary.total_requests as f64 * 100.0;
            status_table.add_row(row![
                format!("{:03}", code),
                format!("{}", count),
                format!("{:.1}%", pct)
            ]);
        }
        println!("状态码分布:");
        status_table.printstd();
    }

    if !summary.endpoints.is_empty() {
        println!("用例明细:");
        for endpoint in sorted_endpoints(summary) {
            let mark = if endpoint.failed_requests > 0 { "✗" } else { "✓" };
            println!("{} {}", mark, endpoint.name);
            println!("   URL: {}", endpoint.url);
            println!(
                "   请求: {} | 成功: {} | 失败: {} | 跳过: {}",
                endpoint.total_requests,
                endpoint.successful_requests,
                endpoint.failed_requests,
                endpoint.skipped_requests
            );
            println!(
                "   响应时间: 平均={} | P50={} | P95={} | P99={}",
                fmt_duration(endpoint.avg_response_time),
                fmt_duration(endpoint.p50_response_time),
                fmt_duration(endpoint.p95_response_time),
                fmt_duration(endpoint.p99_response_time)
            );
        }
        println!();
    }

    if !summary.errors.is_empty() {
        let mut errors: Vec<_> = summary.errors.iter().collect();
        errors.sort_by(|a, b| b.1.cmp(a.1));

        let mut error_table = Table::new();
        error_table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        error_table.add_row(row!["错误信息", "次数"]);
        for (error, count) in errors {
            error_table.add_row(row![error, format!("{}", count)]);
        }
        println!("错误:");
        error_table.printstd();
    }
}

// ========== json报告 ==========

#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub summary: JsonSummary,
    pub endpoints: BTreeMap<String, JsonEndpoint>,
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_logs: Vec<DebugLog>,
}

#[derive(Debug, Serialize)]
pub struct JsonSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub skipped_requests: u64,
    pub success_rate_percent: f64,
    pub total_time: String,
    pub avg_response_time: String,
    pub min_response_time: String,
    pub max_response_time: String,
    pub p50_response_time: String,
    pub p95_response_time: String,
    pub p99_response_time: String,
    pub requests_per_sec: f64,
    pub status_codes: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub total_assertions: u64,
    pub assertions_passed: u64,
    pub assertions_failed: u64,
    pub total_comparisons: u64,
    pub comparisons_passed: u64,
    pub comparisons_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct JsonEndpoint {
    pub name: String,
    pub url: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub skipped_requests: u64,
    pub success_rate_percent: f64,
    pub avg_response_time: String,
    pub p50_response_time: String,
    pub p95_response_time: String,
    pub p99_response_time: String,
    pub status_codes: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub success: bool,
}

pub fn json_report(summary: &Summary) -> JsonReport {
    let success_rate = if summary.total_requests > 0 {
        summary.successful_requests as f64 / summary.total_requests as f64 * 100.0
    } else {
        0.0
    };

    let endpoints = summary
        .endpoints
        .values()
        .map(|ep| {
            let rate = if ep.total_requests > 0 {
                ep.successful_requests as f64 / ep.total_requests as f64 * 100.0
            } else {
                0.0
            };
            (
                ep.name.clone(),
                JsonEndpoint {
                    name: ep.name.clone(),
                    url: ep.url.clone(),
                    total_requests: ep.total_requests,
                    successful_requests: ep.successful_requests,
                    failed_requests: ep.failed_requests,
                    skipped_requests: ep.skipped_requests,
                    success_rate_percent: rate,
                    avg_response_time: fmt_duration(ep.avg_response_time),
                    p50_response_time: fmt_duration(ep.p50_response_time),
                    p95_response_time: fmt_duration(ep.p95_response_time),
                    p99_response_time: fmt_duration(ep.p99_response_time),
                    status_codes: ep
                        .status_codes
                        .iter()
                        .map(|(code, count)| (code.to_string(), *count))
                        .collect(),
                    errors: ep.errors.clone(),
                    success: ep.failed_requests == 0,
                },
            )
        })
        .collect();

    JsonReport {
        summary: JsonSummary {
            total_requests: summary.total_requests,
            successful_requests: summary.successful_requests,
            failed_requests: summary.failed_requests,
            skipped_requests: summary.skipped_requests,
            success_rate_percent: success_rate,
            total_time: fmt_duration(summary.total_time),
            avg_response_time: fmt_duration(summary.avg_response_time),
            min_response_time: fmt_duration(summary.min_response_time),
            max_response_time: fmt_duration(summary.max_response_time),
            p50_response_time: fmt_duration(summary.p50_response_time),
            p95_response_time: fmt_duration(summary.p95_response_time),
            p99_response_time: fmt_duration(summary.p99_response_time),
            requests_per_sec: summary.requests_per_sec,
            status_codes: summary
                .status_codes
                .iter()
                .map(|(code, count)| (code.to_string(), *count))
                .collect(),
            errors: summary
                .errors
                .iter()
                .map(|(e, count)| (e.clone(), *count))
                .collect(),
            total_assertions: summary.total_assertions,
            assertions_passed: summary.assertions_passed,
            assertions_failed: summary.assertions_failed,
            total_comparisons: summary.total_comparisons,
            comparisons_passed: summary.comparisons_passed,
            comparisons_failed: summary.comparisons_failed,
        },
        endpoints,
        success: summary.is_success(),
        debug_logs: summary.debug_logs.clone(),
    }
}

pub fn print_json_report(summary: &Summary) -> anyhow::Result<()> {
    let report = json_report(summary);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ========== html报告 ==========

// 单文件html，数据来自json模型
pub fn render_html_report(summary: &Summary, suite_name: &str) -> String {
    let report = json_report(summary);
    let status_class = if report.success { "pass" } else { "fail" };
    let status_text = if report.success { "通过" } else { "失败" };

    let mut endpoint_rows = String::new();
    for endpoint in sorted_endpoints(summary) {
        let ep_class = if endpoint.failed_requests > 0 { "fail" } else { "pass" };
        endpoint_rows.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            ep_class,
            escape(&endpoint.name),
            escape(&endpoint.url),
            endpoint.total_requests,
            endpoint.successful_requests,
            endpoint.failed_requests,
            endpoint.skipped_requests,
            fmt_duration(endpoint.avg_response_time),
            fmt_duration(endpoint.p99_response_time),
        ));
    }

    let mut error_rows = String::new();
    let mut errors: Vec<_> = summary.errors.iter().collect();
    errors.sort_by(|a, b| b.1.cmp(a.1));
    for (error, count) in errors {
        error_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            escape(error),
            count
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="zh">
<head>
<meta charset="utf-8">
<title>{name} - 测试报告</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #222; }}
h1 {{ font-size: 1.4em; }}
table {{ border-collapse: collapse; margin: 1em 0; min-width: 40em; }}
th, td {{ border: 1px solid #ccc; padding: 0.4em 0.8em; text-align: left; }}
th {{ background: #f0f0f0; }}
.pass {{ color: #1a7f37; }}
.fail {{ color: #c0392b; }}
.badge {{ font-weight: bold; }}
</style>
</head>
<body>
<h1>{name} <span class="badge {status_class}">{status_text}</span></h1>
<table>
<tr><th>总请求数</th><td>{total}</td></tr>
<tr><th>成功</th><td>{success} ({rate:.1}%)</td></tr>
<tr><th>失败</th><td>{failed}</td></tr>
<tr><th>跳过</th><td>{skipped}</td></tr>
<tr><th>RPS</th><td>{rps:.2}</td></tr>
<tr><th>总耗时</th><td>{total_time}</td></tr>
<tr><th>平均 / P50 / P95 / P99</th><td>{avg} / {p50} / {p95} / {p99}</td></tr>
</table>
<h2>用例明细</h2>
<table>
<tr><th>用例</th><th>URL</th><th>请求数</th><th>成功</th><th>失败</th><th>跳过</th><th>平均</th><th>P99</th></tr>
{endpoint_rows}
</table>
{errors_section}
</body>
</html>
"#,
        name = escape(suite_name),
        status_class = status_class,
        status_text = status_text,
        total = report.summary.total_requests,
        success = report.summary.successful_requests,
        rate = report.summary.success_rate_percent,
        failed = report.summary.failed_requests,
        skipped = report.summary.skipped_requests,
        rps = report.summary.requests_per_sec,
        total_time = report.summary.total_time,
        avg = report.summary.avg_response_time,
        p50 = report.summary.p50_response_time,
        p95 = report.summary.p95_response_time,
        p99 = report.summary.p99_response_time,
        endpoint_rows = endpoint_rows,
        errors_section = if error_rows.is_empty() {
            String::new()
        } else {
            format!(
                "<h2>错误</h2>\n<table>\n<tr><th>错误信息</th><th>次数</th></tr>\n{}</table>",
                error_rows
            )
        },
    )
}

// 按首次执行时间排序，展示顺序和执行顺序一致
fn sorted_endpoints(summary: &Summary) -> Vec<&EndpointSummary> {
    let mut endpoints: Vec<_> = summary.endpoints.values().collect();
    endpoints.sort_by_key(|e| e.first_executed_at);
    endpoints
}

fn fmt_duration(d: Duration) -> String {
    format!("{:?}", d)
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample_summary() -> Summary {
        let mut summary = Summary {
            total_requests: 10,
            successful_requests: 8,
            failed_requests: 1,
            skipped_requests: 1,
            total_time: Duration::from_secs(2),
            avg_response_time: Duration::from_millis(120),
            min_response_time: Duration::from_millis(40),
            max_response_time: Duration::from_millis(400),
            p50_response_time: Duration::from_millis(100),
            p95_response_time: Duration::from_millis(300),
            p99_response_time: Duration::from_millis(390),
            requests_per_sec: 4.5,
            ..Default::default()
        };
        summary.status_codes.insert(200, 8);
        summary.status_codes.insert(500, 1);
        summary.errors.insert("boom".to_string(), 1);

        let now = SystemTime::now();
        let mut first = EndpointSummary::new("alpha", "http://x/a", now);
        first.total_requests = 5;
        first.successful_requests = 5;
        let mut second =
            EndpointSummary::new("beta", "http://x/b", now + Duration::from_secs(1));
        second.total_requests = 5;
        second.successful_requests = 3;
        second.failed_requests = 1;
        second.skipped_requests = 1;
        summary.endpoints.insert("beta".to_string(), second);
        summary.endpoints.insert("alpha".to_string(), first);
        summary
    }

    #[test]
    fn json_report_carries_counts() {
        let report = json_report(&sample_summary());
        assert_eq!(report.summary.total_requests, 10);
        assert_eq!(report.summary.skipped_requests, 1);
        assert_eq!(report.summary.status_codes["200"], 8);
        assert_eq!(report.summary.errors["boom"], 1);
        assert!(!report.success);
        assert_eq!(report.endpoints.len(), 2);
        assert!((report.summary.success_rate_percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn json_report_serializes() {
        let report = json_report(&sample_summary());
        let text = serde_json::to_string(&report).unwrap();
        assert!(text.contains("\"total_requests\":10"));
        assert!(text.contains("\"p99_response_time\""));
    }

    #[test]
    fn endpoints_sorted_by_first_execution() {
        let summary = sample_summary();
        let names: Vec<_> = sorted_endpoints(&summary).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn html_is_self_contained_and_escaped() {
        let mut summary = sample_summary();
        summary
            .errors
            .insert("<script>alert(1)</script>".to_string(), 1);
        let html = render_html_report(&summary, "suite <x>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("suite &lt;x&gt;"));
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("alpha"));
        assert!(html.contains("beta"));
    }

    #[test]
    fn text_report_renders_without_panic() {
        print_text_report(&sample_summary());
        print_text_report(&Summary::default());
    }
}
