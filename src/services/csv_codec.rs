//! CSV 编解码
//!
//! - 文件以 UTF-8 BOM 开头，读取时去掉
//! - 嵌套对象（如 `author`）展开为 `author.steamid` 这样的点号列，读回时还原
//! - 表头取所有行字段的并集，按首次出现的顺序排列
//! - 读回的单元格一律为字符串，空单元格视为缺失字段

use crate::error::CheckpointError;
use crate::models::{AnalysisRecord, Construct, ConstructJudgement, RawReview, RAW_OUTPUT_COLUMN};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

const BOM: &str = "\u{feff}";

/// 一行数据：有序的 (列名, 单元格) 列表
pub type Row = Vec<(String, String)>;

/// 将 JSON 值转为单元格文本
fn to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 展开字段映射，嵌套对象展开一层
pub fn flatten(fields: &Map<String, Value>) -> Row {
    let mut row = Row::with_capacity(fields.len());
    for (key, value) in fields {
        match value {
            Value::Object(inner) => {
                for (inner_key, inner_value) in inner {
                    row.push((format!("{}.{}", key, inner_key), to_cell(inner_value)));
                }
            }
            other => row.push((key.clone(), to_cell(other))),
        }
    }
    row
}

/// 还原点号列为嵌套对象
pub fn unflatten(cells: impl IntoIterator<Item = (String, String)>) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, cell) in cells {
        if cell.is_empty() {
            continue;
        }
        let nested = key
            .split_once('.')
            .filter(|(parent, child)| !parent.is_empty() && !child.is_empty())
            .map(|(parent, child)| (parent.to_string(), child.to_string()));

        if let Some((parent, child)) = nested {
            let slot = fields
                .entry(parent)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = slot {
                inner.insert(child, Value::String(cell));
                continue;
            }
        }
        fields.insert(key, Value::String(cell));
    }
    fields
}

/// 原始评论转为一行
pub fn review_to_row(review: &RawReview) -> Row {
    flatten(review.fields())
}

/// 分析记录转为一行：评论字段 + 六个维度 + 原始输出
pub fn record_to_row(record: &AnalysisRecord) -> Row {
    let mut row = flatten(record.review.fields());
    for (construct, judgement) in Construct::ALL.iter().zip(&record.judgements) {
        let flag = match judgement.flag {
            Some(true) => "True",
            Some(false) => "False",
            None => "",
        };
        row.push((construct.flag_column(), flag.to_string()));
        row.push((construct.quote_column(), judgement.quote.clone()));
    }
    row.push((RAW_OUTPUT_COLUMN.to_string(), record.raw_output.clone()));
    row
}

/// 从读回的字段还原分析记录
pub fn record_from_fields(mut fields: Map<String, Value>) -> AnalysisRecord {
    let mut judgements: [ConstructJudgement; 6] = Default::default();
    for (slot, construct) in judgements.iter_mut().zip(Construct::ALL) {
        let flag = fields
            .remove(&construct.flag_column())
            .and_then(|v| parse_flag(&v));
        let quote = fields
            .remove(&construct.quote_column())
            .map(|v| to_cell(&v))
            .unwrap_or_default();
        *slot = ConstructJudgement { flag, quote };
    }
    let raw_output = fields
        .remove(RAW_OUTPUT_COLUMN)
        .map(|v| to_cell(&v))
        .unwrap_or_default();

    AnalysisRecord::new(RawReview::new(fields), judgements, raw_output)
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// 写入 CSV 文件（直接覆盖）
pub fn write_rows(path: &Path, rows: &[Row]) -> Result<(), CheckpointError> {
    let display = path.display().to_string();

    // 表头：所有列的并集，保持首次出现顺序
    let mut header: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for row in rows {
        for (key, _) in row {
            if seen.insert(key.as_str()) {
                header.push(key.as_str());
            }
        }
    }

    let mut file = fs::File::create(path).map_err(|e| CheckpointError::io(&display, e))?;
    file.write_all(BOM.as_bytes())
        .map_err(|e| CheckpointError::io(&display, e))?;

    let mut writer = csv::Writer::from_writer(file);
    if header.is_empty() {
        return Ok(());
    }
    writer
        .write_record(&header)
        .map_err(|e| CheckpointError::csv(&display, e))?;
    for row in rows {
        let record: Vec<&str> = header
            .iter()
            .map(|column| {
                row.iter()
                    .find(|(key, _)| key.as_str() == *column)
                    .map(|(_, cell)| cell.as_str())
                    .unwrap_or("")
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| CheckpointError::csv(&display, e))?;
    }
    writer
        .flush()
        .map_err(|e| CheckpointError::io(&display, e))?;
    Ok(())
}

/// 原子写入：先完整写入 `<path>.tmp`，再重命名覆盖
pub fn write_rows_atomic(path: &Path, rows: &[Row]) -> Result<(), CheckpointError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    if let Err(e) = write_rows(tmp, rows) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    fs::rename(tmp, path).map_err(|e| CheckpointError::io(path.display().to_string(), e))
}

/// 读取 CSV 文件，每行还原为字段映射
pub fn read_rows(path: &Path) -> Result<Vec<Map<String, Value>>, CheckpointError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|e| CheckpointError::io(&display, e))?;
    let content = content.strip_prefix(BOM).unwrap_or(&content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| CheckpointError::csv(&display, e))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| CheckpointError::csv(&display, e))?;
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(key, cell)| (key.to_string(), cell.to_string()));
        rows.push(unflatten(cells));
    }
    Ok(rows)
}

/// 统计 CSV 数据行数
pub fn count_rows(path: &Path) -> Result<usize, CheckpointError> {
    Ok(read_rows(path)?.len())
}
