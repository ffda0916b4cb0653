//! 生成结果解析 - 业务能力层
//!
//! 模型返回的文本可能带有 markdown 代码块或前后说明文字，
//! 这里负责把其中的 JSON 条目取出来。无法解析属于非瞬时失败。

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::clients::GenerationError;
use crate::utils::logging::truncate_text;

/// 包裹条目数组时常见的字段名
const WRAPPER_KEYS: [&str; 4] = ["items", "assessments", "questions", "structures"];

/// 从模型输出中提取 JSON 文本
pub fn extract_json(text: &str) -> String {
    let text = text.trim();

    // 优先取 ```json ... ``` 代码块
    if let Ok(re) = Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```") {
        if let Some(block) = re.captures(text).and_then(|caps| caps.get(1)) {
            return block.as_str().trim().to_string();
        }
    }

    // 否则截取第一个 [ 或 { 到最后一个 ] 或 }
    let start = text.find(|c: char| c == '[' || c == '{');
    let end = text.rfind(|c: char| c == ']' || c == '}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => text[s..=e].to_string(),
        _ => text.to_string(),
    }
}

/// 解析出条目列表
///
/// 支持三种形态：数组、`{"items": [...]}` 这类包裹对象、单个对象
pub fn parse_items(text: &str) -> Result<Vec<JsonValue>, GenerationError> {
    let json = extract_json(text);
    let value: JsonValue = serde_json::from_str(&json).map_err(|e| {
        debug!("无法解析的输出: {}", truncate_text(text, 120));
        GenerationError::invalid_output(format!("JSON 解析失败: {}", e))
    })?;

    let items = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => {
            let wrapped = WRAPPER_KEYS
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(JsonValue::Array(items)) => Some(items),
                    _ => None,
                });
            match wrapped {
                Some(items) => items,
                None => vec![JsonValue::Object(map)],
            }
        }
        other => {
            return Err(GenerationError::invalid_output(format!(
                "期望 JSON 数组或对象，实际为: {}",
                truncate_text(&other.to_string(), 40)
            )))
        }
    };

    if items.is_empty() {
        return Err(GenerationError::invalid_output("返回的条目列表为空"));
    }
    Ok(items)
}

/// 解析为具体类型，并截取期望数量
///
/// 多出的条目丢弃；不足时保留已有条目并记录警告
pub fn parse_typed<T: DeserializeOwned>(
    text: &str,
    expected: usize,
    label: &str,
) -> Result<Vec<T>, GenerationError> {
    let items = parse_items(text)?;
    let returned = items.len();

    let parsed: Vec<T> = items
        .into_iter()
        .take(expected)
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()
        .map_err(|e| GenerationError::invalid_output(format!("条目结构不符合要求: {}", e)))?;

    if returned < expected {
        warn!("{} 期望 {} 个条目，只返回了 {} 个", label, expected, returned);
    } else if returned > expected {
        debug!("{} 返回了 {} 个条目，只保留 {} 个", label, returned, expected);
    }

    Ok(parsed)
}
