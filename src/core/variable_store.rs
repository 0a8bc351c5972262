use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

// 运行期共享的变量表，读并行写互斥
// 种子变量、提取变量、数据行变量都走同一张表，后写覆盖先写
pub struct VariableStore {
    variables: RwLock<HashMap<String, Value>>,
}

impl VariableStore {
    pub fn new() -> Self {
        VariableStore {
            variables: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut vars = self.variables.write().unwrap();
        vars.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let vars = self.variables.read().unwrap();
        vars.get(key).cloned()
    }

    // 渲染成字符串，不存在返回空串
    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Some(value) => render_value(&value),
            None => String::new(),
        }
    }

    pub fn delete(&self, key: &str) {
        let mut vars = self.variables.write().unwrap();
        vars.remove(key);
    }

    pub fn clear(&self) {
        let mut vars = self.variables.write().unwrap();
        vars.clear();
    }

    pub fn set_from_map(&self, data: &HashMap<String, Value>) {
        let mut vars = self.variables.write().unwrap();
        for (k, v) in data {
            vars.insert(k.clone(), v.clone());
        }
    }

    // 整表快照
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let vars = self.variables.read().unwrap();
        vars.clone()
    }

    pub fn len(&self) -> usize {
        let vars = self.variables.read().unwrap();
        vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

// 字符串渲染规则: 字符串取裸内容，其余走json文本，null写成"null"
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
