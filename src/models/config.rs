use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

pub type Headers = HashMap<String, String>;

// 整份套件配置，加载校验完成后不再修改
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub name: String,
    pub description: String,
    pub global: GlobalConfig,
    pub tests: Vec<TestCase>,
}

// 全局默认值，单个用例可以覆盖
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub delay: Duration,
    pub iterations: u32,
    pub duration: Duration,
    pub headers: Headers,
    pub insecure_skip_verify: bool,
    pub variables: HashMap<String, Value>,
    pub think_time: Duration,
    pub think_time_min: Duration,
    pub think_time_max: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Value>,
    pub expected_status: Vec<u16>,
    pub timeout: Duration,
    pub delay: Duration,
    pub iterations: u32,
    pub duration: Duration,
    pub assertions: Vec<Assertion>,
    pub insecure_skip_verify: Option<bool>,
    pub extract: Vec<ExtractionRule>,
    pub depends_on: Vec<String>,
    pub think_time: Duration,
    pub think_time_min: Duration,
    pub think_time_max: Duration,
    pub data: Vec<serde_json::Map<String, Value>>,
    pub data_file: Option<String>,
    pub compare_with: Option<CompareConfig>,
}

// 声明式断言，kind取值: status / json_path / response_time / header / body_size
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assertion {
    pub kind: String,
    pub target: String,
    pub operator: String,
    pub value: Value,
}

// 从响应中抽取变量的规则，source取值: body / header / status
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionRule {
    pub name: String,
    pub source: String,
    pub path: String,
}

// 影子对比配置，endpoint是对比侧的base url
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompareConfig {
    pub endpoint: String,
    pub path: Option<String>,
    pub headers: Headers,
    pub timeout: Duration,
    pub assertions: Vec<CompareAssertion>,
    pub ignore_fields: Vec<String>,
    pub mode: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompareAssertion {
    pub kind: String,
    pub target: String,
    pub operator: String,
    pub tolerance: Value,
}

impl TestCase {
    // 用例覆盖全局，都没配按1次算
    pub fn effective_iterations(&self, global: &GlobalConfig) -> u32 {
        let n = if self.iterations > 0 {
            self.iterations
        } else {
            global.iterations
        };
        n.max(1)
    }

    pub fn effective_duration(&self, global: &GlobalConfig) -> Duration {
        if !self.duration.is_zero() {
            self.duration
        } else {
            global.duration
        }
    }

    pub fn effective_timeout(&self, global: &GlobalConfig) -> Duration {
        if !self.timeout.is_zero() {
            self.timeout
        } else {
            global.timeout
        }
    }

    pub fn effective_delay(&self, global: &GlobalConfig) -> Duration {
        if !self.delay.is_zero() {
            self.delay
        } else {
            global.delay
        }
    }

    pub fn effective_skip_verify(&self, global: &GlobalConfig) -> bool {
        self.insecure_skip_verify
            .unwrap_or(global.insecure_skip_verify)
    }

    // 拼接完整url，保证base和path之间恰好一个斜杠
    pub fn full_url(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

impl Config {
    pub fn is_duration_based(&self) -> bool {
        !self.global.duration.is_zero()
    }

    pub fn has_mixed_mode(&self) -> bool {
        let mut has_duration = !self.global.duration.is_zero();
        let mut has_iterations = self.global.iterations > 0;

        for test in &self.tests {
            if !test.duration.is_zero() {
                has_duration = true;
            }
            if test.iterations > 0 {
                has_iterations = true;
            }
        }

        has_duration && has_iterations
    }

    pub fn has_dependencies(&self) -> bool {
        self.tests.iter().any(|t| !t.depends_on.is_empty())
    }

    // 进度条用的总请求数估算，duration模式按每个用例1rps粗估
    pub fn total_request_estimate(&self) -> u64 {
        if !self.global.duration.is_zero() {
            return self.global.duration.as_secs() * self.tests.len() as u64;
        }

        let mut total = 0u64;
        for test in &self.tests {
            if !test.duration.is_zero() {
                total += test.duration.as_secs();
            } else {
                let iterations = if test.iterations > 0 {
                    test.iterations
                } else {
                    self.global.iterations
                };
                total += iterations as u64;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_case(name: &str, iterations: u32) -> TestCase {
        TestCase {
            name: name.to_string(),
            method: "GET".to_string(),
            path: "/ping".to_string(),
            expected_status: vec![200],
            iterations,
            ..Default::default()
        }
    }

    #[test]
    fn total_estimate_global_iterations() {
        let config = Config {
            name: "estimate".to_string(),
            global: GlobalConfig {
                base_url: "http://localhost".to_string(),
                iterations: 10,
                ..Default::default()
            },
            tests: vec![test_case("a", 0), test_case("b", 0)],
            ..Default::default()
        };
        assert_eq!(config.total_request_estimate(), 20);
    }

    #[test]
    fn total_estimate_test_override() {
        let config = Config {
            name: "estimate".to_string(),
            global: GlobalConfig {
                iterations: 10,
                ..Default::default()
            },
            tests: vec![test_case("a", 3), test_case("b", 0)],
            ..Default::default()
        };
        assert_eq!(config.total_request_estimate(), 13);
    }

    #[test]
    fn total_estimate_duration_mode() {
        let config = Config {
            name: "estimate".to_string(),
            global: GlobalConfig {
                duration: Duration::from_secs(30),
                ..Default::default()
            },
            tests: vec![test_case("a", 0), test_case("b", 0)],
            ..Default::default()
        };
        // 粗估: 每个用例1rps
        assert_eq!(config.total_request_estimate(), 60);
    }

    #[test]
    fn mixed_mode_detection() {
        let mut config = Config {
            global: GlobalConfig {
                duration: Duration::from_secs(5),
                ..Default::default()
            },
            tests: vec![test_case("a", 0)],
            ..Default::default()
        };
        assert!(config.is_duration_based());
        assert!(!config.has_mixed_mode());

        config.tests[0].iterations = 4;
        assert!(config.has_mixed_mode());
    }

    #[test]
    fn full_url_joins_with_single_slash() {
        let t = TestCase {
            path: "/users".to_string(),
            ..Default::default()
        };
        assert_eq!(t.full_url("http://api.local/"), "http://api.local/users");
        let t2 = TestCase {
            path: "users".to_string(),
            ..Default::default()
        };
        assert_eq!(t2.full_url("http://api.local"), "http://api.local/users");
    }

    #[test]
    fn effective_overrides() {
        let global = GlobalConfig {
            timeout: Duration::from_secs(30),
            delay: Duration::from_millis(50),
            iterations: 5,
            insecure_skip_verify: true,
            ..Default::default()
        };
        let test = TestCase {
            timeout: Duration::from_secs(2),
            insecure_skip_verify: Some(false),
            ..Default::default()
        };
        assert_eq!(test.effective_timeout(&global), Duration::from_secs(2));
        assert_eq!(test.effective_delay(&global), Duration::from_millis(50));
        assert_eq!(test.effective_iterations(&global), 5);
        assert!(!test.effective_skip_verify(&global));
    }
}
