//! 提示词构建 - 业务能力层
//!
//! 只负责把上下文拼成提示词，并约定返回的 JSON 结构。
//! 提示词措辞本身不是契约的一部分，返回结构才是。

use serde_json::Value as JsonValue;

use crate::clients::GenerationPrompt;
use crate::models::artifact::Artifact;
use crate::models::request::{AssessmentPrefs, GenerationContext, Unit};
use crate::models::stage::{DerivedFormat, QuestionCategory, StageKind};

const SYSTEM_MESSAGE: &str = "你是一名资深的课程与评价设计专家，擅长根据课程目标设计评价方案。\
                              你的回答只包含 JSON，不要包含任何解释文字。";

/// 形成性 / 总结性评价提示词
pub fn assessment_prompt(
    stage: StageKind,
    context: &GenerationContext,
    unit: &Unit,
    prefs: &AssessmentPrefs,
) -> GenerationPrompt {
    let formats = if prefs.formats.is_empty() {
        "不限".to_string()
    } else {
        prefs.formats.join("、")
    };
    let weight = prefs
        .weight
        .map(|w| format!("{:.1}%", w))
        .unwrap_or_else(|| "未指定".to_string());

    let shape = match stage {
        StageKind::Summative => {
            r#"[{"title": "...", "format": "...", "instructions": "...", "criteria": ["..."]}]"#
        }
        _ => r#"[{"title": "...", "format": "...", "instructions": "...", "questions": ["..."]}]"#,
    };

    let user = format!(
        r#"请为以下课程模块设计 {count} 个{stage}。

课程背景：
{context}

模块：
  ID：{unit_id}
  标题：{unit_title}
  概要：{unit_summary}

要求：
- 评价形式：{formats}
- 该类评价在总成绩中的权重：{weight}

按如下 JSON 数组格式返回，数组长度为 {count}：
{shape}"#,
        count = prefs.per_unit,
        stage = stage.name(),
        context = render_context(context),
        unit_id = unit.id,
        unit_title = unit.title,
        unit_summary = unit.summary.as_deref().unwrap_or("无"),
        formats = formats,
        weight = weight,
        shape = shape,
    );

    GenerationPrompt::new(user).with_system(SYSTEM_MESSAGE)
}

/// 样题提示词
pub fn sample_prompt(
    context: &GenerationContext,
    units: &[Unit],
    category: QuestionCategory,
    count: u8,
) -> GenerationPrompt {
    let unit_titles: Vec<&str> = units.iter().map(|u| u.title.as_str()).collect();

    let user = format!(
        r#"请为以下课程编写 {count} 道{category}样题。

课程背景：
{context}

覆盖的模块：{units}

按如下 JSON 数组格式返回，数组长度为 {count}：
[{{"stem": "...", "options": ["..."], "answer": "...", "explanation": "..."}}]
没有选项的题型 options 返回空数组。"#,
        count = count,
        category = category.name(),
        context = render_context(context),
        units = if unit_titles.is_empty() {
            "全部".to_string()
        } else {
            unit_titles.join("、")
        },
    );

    GenerationPrompt::new(user).with_system(SYSTEM_MESSAGE)
}

/// 派生结构提示词，基于本次运行前面阶段的产出
pub fn derived_prompt(
    context: &GenerationContext,
    format: DerivedFormat,
    prior: &[Artifact],
) -> GenerationPrompt {
    let outline: Vec<JsonValue> = prior
        .iter()
        .map(|a| {
            serde_json::json!({
                "stage": a.stage().as_str(),
                "source": a.source_id(),
                "title": a.title(),
            })
        })
        .collect();
    let outline_json = serde_json::to_string_pretty(&outline).unwrap_or_default();

    let user = format!(
        r#"请根据已经生成的评价内容，整理出一份{format}。

课程背景：
{context}

已生成的内容（共 {count} 项）：
{outline}

按如下 JSON 格式返回：
{{"title": "...", "body": {{ ... }}}}"#,
        format = format.name(),
        context = render_context(context),
        count = prior.len(),
        outline = outline_json,
    );

    GenerationPrompt::new(user).with_system(SYSTEM_MESSAGE)
}

fn render_context(context: &GenerationContext) -> String {
    let mut lines = Vec::new();
    if let Some(description) = &context.subject_description {
        lines.push(format!("  课程描述：{}", description.trim()));
    }
    for (label, blob) in [
        ("专业", &context.program),
        ("能力目标", &context.competency),
        ("课程", &context.course),
    ] {
        if !blob.is_null() {
            lines.push(format!("  {}：{}", label, blob));
        }
    }
    if lines.is_empty() {
        "  无".to_string()
    } else {
        lines.join("\n")
    }
}
