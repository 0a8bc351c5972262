use serde_json::Value;

// 点分路径取值: 对象按键下钻，数字段落在数组上当下标，`#`取数组长度
// 例: items.0.id / user.profile.name / tags.#
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(root.clone());
    }

    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(items) => {
                if segment == "#" {
                    return Some(Value::from(items.len() as u64));
                }
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

pub fn exists(root: &Value, path: &str) -> bool {
    lookup(root, path).is_some()
}
