use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::config::TestCase;

pub type DataRow = Map<String, Value>;

// 拿到用例的数据行: 内联data优先，其次data_file，都没有返回空
// 文件加载失败只告警，用例退化成纯迭代执行
pub fn data_rows(test: &TestCase) -> Vec<DataRow> {
    if !test.data.is_empty() {
        return test.data.clone();
    }

    if let Some(path) = &test.data_file {
        match load_from_file(path) {
            Ok(rows) => return rows,
            Err(e) => {
                warn!("数据文件{}加载失败: {:#}", path, e);
                return Vec::new();
            }
        }
    }

    Vec::new()
}

fn load_from_file(path: &str) -> Result<Vec<DataRow>> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => Err(anyhow!("不支持的数据文件格式: .{}", other)),
    }
}

fn load_json(path: &str) -> Result<Vec<DataRow>> {
    let data = std::fs::read(path).with_context(|| format!("读取{}失败", path))?;
    let rows: Vec<DataRow> =
        serde_json::from_slice(&data).with_context(|| format!("解析{}的json失败", path))?;
    Ok(rows)
}

// csv第一行是表头，单元格一律按字符串存
fn load_csv(path: &str) -> Result<Vec<DataRow>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("打开{}失败", path))?;

    let headers: Vec<String> = reader
        .headers()
        .context("读取csv表头失败")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("读取csv数据行失败")?;
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            if let Some(cell) = record.get(i) {
                row.insert(header.clone(), Value::String(cell.to_string()));
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(anyhow!("csv文件至少要有表头和一行数据"));
    }

    Ok(rows)
}
