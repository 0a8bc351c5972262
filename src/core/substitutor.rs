use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::core::variable_store::{render_value, VariableStore};

lazy_static! {
    // ${name}，支持点分名比如${data.username}
    static ref VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").unwrap();
}

// 把字符串和body里的${name}换成变量表里的值
pub struct Substitutor {
    store: Arc<VariableStore>,
}

impl Substitutor {
    pub fn new(store: Arc<VariableStore>) -> Self {
        Substitutor { store }
    }

    // 字符串替换，找不到的变量原样保留
    pub fn substitute(&self, input: &str) -> String {
        VAR_PATTERN
            .replace_all(input, |caps: &regex::Captures| {
                let name = &caps[1];
                match self.store.get(name) {
                    Some(value) => render_value(&value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    pub fn substitute_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.substitute(v)))
            .collect()
    }

    // body递归替换
    // 整个字符串就是一个${name}时直接返回变量原值，数字还是数字、布尔还是布尔
    pub fn substitute_body(&self, body: &Value) -> Value {
        match body {
            Value::String(s) => {
                if let Some(caps) = VAR_PATTERN.captures(s) {
                    if &caps[0] == s.as_str() {
                        return match self.store.get(&caps[1]) {
                            Some(value) => value,
                            None => body.clone(),
                        };
                    }
                }
                Value::String(self.substitute(s))
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_body(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.substitute_body(v)).collect())
            }
            // 数字布尔null原样过
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> Substitutor {
        let store = Arc::new(VariableStore::new());
        store.set("name", json!("world"));
        store.set("user_id", json!(42));
        store.set("pi", json!(3.14));
        store.set("ok", json!(true));
        store.set("data.username", json!("alice"));
        Substitutor::new(store)
    }

    #[test]
    fn substitute_single_token() {
        let s = setup();
        assert_eq!(s.substitute("hello ${name}"), "hello world");
    }

    #[test]
    fn substitute_multiple_tokens() {
        let s = setup();
        assert_eq!(
            s.substitute("/users/${user_id}/greet/${name}"),
            "/users/42/greet/world"
        );
    }

    #[test]
    fn missing_variable_stays_literal() {
        let s = setup();
        assert_eq!(s.substitute("v=${unknown}"), "v=${unknown}");
    }

    #[test]
    fn dotted_names_resolve() {
        let s = setup();
        assert_eq!(s.substitute("hi ${data.username}"), "hi alice");
    }

    #[test]
    fn substitute_map_touches_all_values() {
        let s = setup();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer ${name}".to_string());
        headers.insert("X-Plain".to_string(), "fixed".to_string());
        let out = s.substitute_map(&headers);
        assert_eq!(out["Authorization"], "Bearer world");
        assert_eq!(out["X-Plain"], "fixed");
    }

    #[test]
    fn whole_string_reference_keeps_type() {
        let s = setup();
        // 整串引用保留原始类型
        assert_eq!(s.substitute_body(&json!("${user_id}")), json!(42));
        assert_eq!(s.substitute_body(&json!("${pi}")), json!(3.14));
        assert_eq!(s.substitute_body(&json!("${ok}")), json!(true));
        // 有包围文本就退化成字符串
        assert_eq!(s.substitute_body(&json!("id=${user_id}")), json!("id=42"));
    }

    #[test]
    fn body_substitution_recurses() {
        let s = setup();
        let body = json!({
            "user": {"id": "${user_id}", "name": "${name}"},
            "tags": ["${name}", "static"],
            "count": 3
        });
        let out = s.substitute_body(&body);
        assert_eq!(
            out,
            json!({
                "user": {"id": 42, "name": "world"},
                "tags": ["world", "static"],
                "count": 3
            })
        );
    }

    #[test]
    fn whole_string_missing_variable_unchanged() {
        let s = setup();
        assert_eq!(s.substitute_body(&json!("${missing}")), json!("${missing}"));
    }

    #[test]
    fn scalars_pass_through() {
        let s = setup();
        assert_eq!(s.substitute_body(&json!(10)), json!(10));
        assert_eq!(s.substitute_body(&Value::Null), Value::Null);
        assert_eq!(s.substitute_body(&json!(false)), json!(false));
    }
}
