use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::config::{
    Assertion, CompareAssertion, CompareConfig, Config, ExtractionRule, GlobalConfig, TestCase,
};

// 没配超时按30秒
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// 磁盘上的原始格式，时长都是带单位的字符串
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    global: RawGlobalConfig,
    #[serde(default)]
    tests: Vec<RawTestCase>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawGlobalConfig {
    #[serde(default)]
    base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    insecure_skip_verify: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time_min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time_max: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTestCase {
    name: String,
    method: String,
    path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default)]
    expected_status: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    assertions: Vec<RawAssertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insecure_skip_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extract: Vec<RawExtraction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time_min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    think_time_max: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    data: Vec<serde_json::Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compare_with: Option<RawCompareConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawAssertion {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    operator: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawExtraction {
    name: String,
    source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawCompareConfig {
    endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    assertions: Vec<RawCompareAssertion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ignore_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    mode: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawCompareAssertion {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    operator: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    tolerance: Value,
}

// 从文件加载并校验
pub fn load_from_file(path: &str) -> Result<Config> {
    let data = std::fs::read(path).with_context(|| format!("读取配置文件{}失败", path))?;
    load_from_slice(&data)
}

pub fn load_from_slice(data: &[u8]) -> Result<Config> {
    let raw: RawConfig = serde_json::from_slice(data).context("解析配置json失败")?;
    let config = parse_config(raw).context("解析配置失败")?;
    validate_config(&config).context("配置不合法")?;
    Ok(config)
}

fn parse_duration_opt(value: &Option<String>, what: &str) -> Result<Duration> {
    match value {
        Some(s) if !s.is_empty() => {
            humantime::parse_duration(s).map_err(|e| anyhow!("{}不合法: {}", what, e))
        }
        _ => Ok(Duration::ZERO),
    }
}

fn parse_config(raw: RawConfig) -> Result<Config> {
    let timeout = match &raw.global.timeout {
        Some(s) if !s.is_empty() => {
            humantime::parse_duration(s).map_err(|e| anyhow!("全局timeout不合法: {}", e))?
        }
        _ => DEFAULT_TIMEOUT,
    };

    let global = GlobalConfig {
        base_url: raw.global.base_url,
        timeout,
        delay: parse_duration_opt(&raw.global.delay, "全局delay")?,
        iterations: raw.global.iterations.unwrap_or(0),
        duration: parse_duration_opt(&raw.global.duration, "全局duration")?,
        headers: raw.global.headers,
        insecure_skip_verify: raw.global.insecure_skip_verify,
        variables: raw.global.variables,
        think_time: parse_duration_opt(&raw.global.think_time, "全局think_time")?,
        think_time_min: parse_duration_opt(&raw.global.think_time_min, "全局think_time_min")?,
        think_time_max: parse_duration_opt(&raw.global.think_time_max, "全局think_time_max")?,
    };

    let mut tests = Vec::with_capacity(raw.tests.len());
    for (i, raw_test) in raw.tests.into_iter().enumerate() {
        let what = |field: &str| format!("第{}个用例的{}", i, field);

        let compare_with = match raw_test.compare_with {
            Some(raw_compare) => Some(CompareConfig {
                endpoint: raw_compare.endpoint,
                path: raw_compare.path,
                headers: raw_compare.headers,
                timeout: parse_duration_opt(&raw_compare.timeout, &what("compare_with.timeout"))?,
                assertions: raw_compare
                    .assertions
                    .into_iter()
                    .map(|a| CompareAssertion {
                        kind: a.kind,
                        target: a.target,
                        operator: a.operator,
                        tolerance: a.tolerance,
                    })
                    .collect(),
                ignore_fields: raw_compare.ignore_fields,
                mode: raw_compare.mode,
            }),
            None => None,
        };

        tests.push(TestCase {
            name: raw_test.name,
            method: raw_test.method,
            path: raw_test.path,
            headers: raw_test.headers,
            body: raw_test.body,
            expected_status: raw_test.expected_status,
            timeout: parse_duration_opt(&raw_test.timeout, &what("timeout"))?,
            delay: parse_duration_opt(&raw_test.delay, &what("delay"))?,
            iterations: raw_test.iterations.unwrap_or(0),
            duration: parse_duration_opt(&raw_test.duration, &what("duration"))?,
            assertions: raw_test
                .assertions
                .into_iter()
                .map(|a| Assertion {
                    kind: a.kind,
                    target: a.target,
                    operator: a.operator,
                    value: a.value,
                })
                .collect(),
            insecure_skip_verify: raw_test.insecure_skip_verify,
            extract: raw_test
                .extract
                .into_iter()
                .map(|e| ExtractionRule {
                    name: e.name,
                    source: e.source,
                    path: e.path,
                })
                .collect(),
            depends_on: raw_test.depends_on,
            think_time: parse_duration_opt(&raw_test.think_time, &what("think_time"))?,
            think_time_min: parse_duration_opt(&raw_test.think_time_min, &what("think_time_min"))?,
            think_time_max: parse_duration_opt(&raw_test.think_time_max, &what("think_time_max"))?,
            data: raw_test.data,
            data_file: raw_test.data_file,
            compare_with,
        });
    }

    Ok(Config {
        name: raw.name,
        description: raw.description,
        global,
        tests,
    })
}

fn validate_config(config: &Config) -> Result<()> {
    if config.name.is_empty() {
        return Err(anyhow!("config name is required"));
    }
    if config.global.base_url.is_empty() {
        return Err(anyhow!("global base_url is required"));
    }
    if config.global.duration.is_zero() && config.global.iterations == 0 {
        return Err(anyhow!(
            "either global duration or global iterations must be greater than 0"
        ));
    }
    // 两个都配了按duration跑
    if !config.global.duration.is_zero() && config.global.iterations > 0 {
        warn!("全局duration和iterations同时配置，以duration为准");
    }
    if config.tests.is_empty() {
        return Err(anyhow!("at least one test case is required"));
    }

    let mut seen_names = HashSet::new();
    for (i, test) in config.tests.iter().enumerate() {
        if test.name.is_empty() {
            return Err(anyhow!("test {}: name is required", i));
        }
        if !seen_names.insert(test.name.clone()) {
            return Err(anyhow!("test {}: duplicate name '{}'", i, test.name));
        }
        if test.method.is_empty() {
            return Err(anyhow!("test {}: method is required", i));
        }
        if test.path.is_empty() {
            return Err(anyhow!("test {}: path is required", i));
        }
        if test.expected_status.is_empty() {
            return Err(anyhow!("test {}: at least one expected status is required", i));
        }

        if let Some(compare) = &test.compare_with {
            if compare.endpoint.is_empty() {
                return Err(anyhow!(
                    "test {}: compare_with.endpoint is required when compare_with is specified",
                    i
                ));
            }
            for (j, assertion) in compare.assertions.iter().enumerate() {
                if assertion.kind.is_empty() {
                    return Err(anyhow!(
                        "test {}: compare_with.assertions[{}].type is required",
                        i,
                        j
                    ));
                }
                // structure_match和status_match之外的类型必须有target
                if assertion.target.is_empty()
                    && assertion.kind != "structure_match"
                    && assertion.kind != "status_match"
                    && assertion.kind != "response_time_tolerance"
                {
                    return Err(anyhow!(
                        "test {}: compare_with.assertions[{}].target is required for type {}",
                        i,
                        j,
                        assertion.kind
                    ));
                }
            }
        }
    }

    Ok(())
}

// 反向导出成磁盘格式，时长重新格式化成带单位的字符串
// load -> to_json -> load 必须得到同一份逻辑配置
pub fn to_json(config: &Config) -> Value {
    let fmt = |d: Duration| {
        if d.is_zero() {
            None
        } else {
            Some(humantime::format_duration(d).to_string())
        }
    };

    let raw = RawConfig {
        name: config.name.clone(),
        description: config.description.clone(),
        global: RawGlobalConfig {
            base_url: config.global.base_url.clone(),
            timeout: fmt(config.global.timeout),
            delay: fmt(config.global.delay),
            iterations: if config.global.iterations > 0 {
                Some(config.global.iterations)
            } else {
                None
            },
            duration: fmt(config.global.duration),
            headers: config.global.headers.clone(),
            insecure_skip_verify: config.global.insecure_skip_verify,
            variables: config.global.variables.clone(),
            think_time: fmt(config.global.think_time),
            think_time_min: fmt(config.global.think_time_min),
            think_time_max: fmt(config.global.think_time_max),
        },
        tests: config
            .tests
            .iter()
            .map(|test| RawTestCase {
                name: test.name.clone(),
                method: test.method.clone(),
                path: test.path.clone(),
                headers: test.headers.clone(),
                body: test.body.clone(),
                expected_status: test.expected_status.clone(),
                timeout: fmt(test.timeout),
                delay: fmt(test.delay),
                iterations: if test.iterations > 0 {
                    Some(test.iterations)
                } else {
                    None
                },
                duration: fmt(test.duration),
                assertions: test
                    .assertions
                    .iter()
                    .map(|a| RawAssertion {
                        kind: a.kind.clone(),
                        target: a.target.clone(),
                        operator: a.operator.clone(),
                        value: a.value.clone(),
                    })
                    .collect(),
                insecure_skip_verify: test.insecure_skip_verify,
                extract: test
                    .extract
                    .iter()
                    .map(|e| RawExtraction {
                        name: e.name.clone(),
                        source: e.source.clone(),
                        path: e.path.clone(),
                    })
                    .collect(),
                depends_on: test.depends_on.clone(),
                think_time: fmt(test.think_time),
                think_time_min: fmt(test.think_time_min),
                think_time_max: fmt(test.think_time_max),
                data: test.data.clone(),
                data_file: test.data_file.clone(),
                compare_with: test.compare_with.as_ref().map(|c| RawCompareConfig {
                    endpoint: c.endpoint.clone(),
                    path: c.path.clone(),
                    headers: c.headers.clone(),
                    timeout: fmt(c.timeout),
                    assertions: c
                        .assertions
                        .iter()
                        .map(|a| RawCompareAssertion {
                            kind: a.kind.clone(),
                            target: a.target.clone(),
                            operator: a.operator.clone(),
                            tolerance: a.tolerance.clone(),
                        })
                        .collect(),
                    ignore_fields: c.ignore_fields.clone(),
                    mode: c.mode.clone(),
                }),
            })
            .collect(),
    };

    serde_json::to_value(raw).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"{
        "name": "api-suite",
        "description": "contract suite",
        "global": {
            "base_url": "https://api.example.com",
            "timeout": "10s",
            "delay": "100ms",
            "iterations": 3,
            "headers": {"X-Env": "test"},
            "variables": {"tenant": "acme", "rev": 7}
        },
        "tests": [
            {
                "name": "health",
                "method": "GET",
                "path": "/health",
                "expected_status": [200],
                "assertions": [
                    {"type": "status", "operator": "eq", "value": 200},
                    {"type": "json_path", "target": "status", "operator": "eq", "value": "ok"}
                ]
            },
            {
                "name": "create",
                "method": "POST",
                "path": "/users",
                "expected_status": [201, 200],
                "body": {"name": "${data.name}"},
                "timeout": "2s",
                "extract": [{"name": "uid", "source": "body", "path": "id"}],
                "compare_with": {
                    "endpoint": "https://shadow.example.com",
                    "timeout": "5s",
                    "mode": "partial",
                    "ignore_fields": ["meta.ts"],
                    "assertions": [
                        {"type": "field_tolerance", "target": "value", "tolerance": 0.1},
                        {"type": "status_match"}
                    ]
                }
            }
        ]
    }"#;

    #[test]
    fn parses_valid_config() {
        let config = load_from_slice(VALID.as_bytes()).unwrap();
        assert_eq!(config.name, "api-suite");
        assert_eq!(config.global.timeout, Duration::from_secs(10));
        assert_eq!(config.global.delay, Duration::from_millis(100));
        assert_eq!(config.global.iterations, 3);
        assert_eq!(config.global.variables["rev"], json!(7));
        assert_eq!(config.tests.len(), 2);
        assert_eq!(config.tests[0].assertions.len(), 2);
        assert_eq!(config.tests[1].expected_status, vec![201, 200]);
        assert_eq!(config.tests[1].timeout, Duration::from_secs(2));

        let compare = config.tests[1].compare_with.as_ref().unwrap();
        assert_eq!(compare.endpoint, "https://shadow.example.com");
        assert_eq!(compare.timeout, Duration::from_secs(5));
        assert_eq!(compare.mode, "partial");
        assert_eq!(compare.assertions.len(), 2);
    }

    #[test]
    fn default_timeout_is_30s() {
        let config = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap();
        assert_eq!(config.global.timeout, Duration::from_secs(30));
    }

    #[test]
    fn compound_duration_strings() {
        let config = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","duration":"1m30s"},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap();
        assert_eq!(config.global.duration, Duration::from_secs(90));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(load_from_slice(b"{not json").is_err());
    }

    #[test]
    fn malformed_duration_is_an_error() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","timeout":"banana","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("timeout"));
    }

    #[test]
    fn missing_name_rejected() {
        let err = load_from_slice(
            br#"{"name":"","global":{"base_url":"http://a","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("name is required"));
    }

    #[test]
    fn missing_base_url_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("base_url"));
    }

    #[test]
    fn neither_duration_nor_iterations_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a"},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("duration or global iterations"));
    }

    #[test]
    fn empty_tests_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},"tests":[]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("at least one test case"));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("expected status"));
    }

    #[test]
    fn duplicate_test_names_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},
                "tests":[
                    {"name":"t","method":"GET","path":"/","expected_status":[200]},
                    {"name":"t","method":"GET","path":"/","expected_status":[200]}
                ]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate name"));
    }

    #[test]
    fn compare_with_without_endpoint_rejected() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200],
                    "compare_with":{"endpoint":""}}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("compare_with.endpoint"));
    }

    #[test]
    fn compare_assertion_target_required_for_field_kinds() {
        let err = load_from_slice(
            br#"{"name":"x","global":{"base_url":"http://a","iterations":1},
                "tests":[{"name":"t","method":"GET","path":"/","expected_status":[200],
                    "compare_with":{"endpoint":"http://b",
                        "assertions":[{"type":"field_match"}]}}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("target is required"));
    }

    #[test]
    fn round_trip_preserves_logical_config() {
        let config = load_from_slice(VALID.as_bytes()).unwrap();
        let emitted = serde_json::to_vec(&to_json(&config)).unwrap();
        let reparsed = load_from_slice(&emitted).unwrap();
        assert_eq!(config, reparsed);
    }
}
