use crate::models::request::GenerationRequest;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从文件加载生成请求
///
/// 按扩展名选择格式：`.json` 使用 JSON，其余按 TOML 解析
pub async fn load_request(path: &Path) -> Result<GenerationRequest> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取请求文件: {}", path.display()))?;

    parse_request(&content, path)
}

fn parse_request(content: &str, path: &Path) -> Result<GenerationRequest> {
    let is_json = path.extension().and_then(|s| s.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("无法解析JSON请求文件: {}", path.display()))
    } else {
        toml::from_str(content).with_context(|| format!("无法解析TOML请求文件: {}", path.display()))
    }
}

/// 从文件夹中加载所有请求文件
///
/// 单个文件解析失败只记录警告，不影响其他文件
pub async fn load_all_requests(folder_path: &str) -> Result<Vec<GenerationRequest>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("toml") | Some("json")
        ) {
            paths.push(path);
        }
    }
    // 目录遍历顺序不稳定，按文件名排序
    paths.sort();

    let mut requests = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_request(&path).await {
            Ok(request) => {
                tracing::info!("成功加载请求，包含 {} 个模块", request.units.len());
                requests.push(request);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::{DerivedFormat, StageKind};

    const TOML_REQUEST: &str = r#"
subject_id = "ds-101"
stage_id = 4

[context]
subject_description = "数据结构与算法基础课程"

[context.program]
name = "计算机科学"
level = 1

[[units]]
id = "m1"
title = "线性表"

[[units]]
id = "m2"
title = "树与二叉树"
summary = "遍历与平衡"

[preferences.formative]
per_unit = 2
formats = ["quiz"]
weight = 40.0

[preferences.summative]
per_unit = 1
weight = 60.0

[preferences.derived]
formats = ["question_bank", "lms_package"]
"#;

    #[test]
    fn test_parse_toml_request() {
        let request = parse_request(TOML_REQUEST, Path::new("req.toml")).unwrap();
        assert_eq!(request.subject_id, "ds-101");
        assert_eq!(request.units.len(), 2);
        assert_eq!(request.units[1].summary.as_deref(), Some("遍历与平衡"));
        assert_eq!(request.context.program["level"], 1);
        assert_eq!(
            request.requested_stages(),
            vec![StageKind::Formative, StageKind::Summative, StageKind::Derived]
        );
        assert_eq!(
            request.preferences.derived.unwrap().formats,
            vec![DerivedFormat::QuestionBank, DerivedFormat::LmsPackage]
        );
    }

    #[test]
    fn test_parse_json_request_by_extension() {
        let json = r#"{"subject_id":"x","stage_id":1,"preferences":{"samples":{"per_category":2}}}"#;
        let request = parse_request(json, Path::new("req.json")).unwrap();
        assert_eq!(request.preferences.samples.unwrap().per_category, 2);
    }

    #[test]
    fn test_parse_error_mentions_path() {
        let err = parse_request("not = [valid", Path::new("broken.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = load_request(Path::new("/definitely/not/here.toml")).await;
        assert!(result.is_err());
    }
}
