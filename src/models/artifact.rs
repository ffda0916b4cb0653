//! 生成产物
//!
//! 每个阶段产出一种固定的产物类型，使用 `kind` 字段区分，
//! 消费方通过 match 穷尽处理，不需要在运行时猜测内容结构。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::stage::{DerivedFormat, QuestionCategory, StageKind};

/// 单个生成产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Formative(FormativeAssessment),
    Summative(SummativeAssessment),
    Sample(SampleQuestion),
    Derived(DerivedStructure),
}

impl Artifact {
    /// 产物所属阶段
    pub fn stage(&self) -> StageKind {
        match self {
            Artifact::Formative(_) => StageKind::Formative,
            Artifact::Summative(_) => StageKind::Summative,
            Artifact::Sample(_) => StageKind::Samples,
            Artifact::Derived(_) => StageKind::Derived,
        }
    }

    /// 产物来源的迭代项（模块 ID / 题型 / 派生格式）
    pub fn source_id(&self) -> &str {
        match self {
            Artifact::Formative(a) => &a.unit_id,
            Artifact::Summative(a) => &a.unit_id,
            Artifact::Sample(q) => q.category.as_str(),
            Artifact::Derived(d) => d.format.as_str(),
        }
    }

    /// 用于日志和摘要的标题
    pub fn title(&self) -> &str {
        match self {
            Artifact::Formative(a) => &a.title,
            Artifact::Summative(a) => &a.title,
            Artifact::Sample(q) => &q.stem,
            Artifact::Derived(d) => &d.title,
        }
    }
}

/// 形成性评价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormativeAssessment {
    pub unit_id: String,
    pub title: String,
    pub format: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// 总结性评价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummativeAssessment {
    pub unit_id: String,
    pub title: String,
    pub format: String,
    #[serde(default)]
    pub instructions: String,
    /// 评分标准
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// 样题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleQuestion {
    pub category: QuestionCategory,
    pub stem: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

/// 派生结构，内容结构由目标格式决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedStructure {
    pub format: DerivedFormat,
    pub title: String,
    #[serde(default)]
    pub body: JsonValue,
}
