use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::stage::{DerivedFormat, StageKind};

/// 生成请求
///
/// 调用方提供的不可变输入：上下文、有序的模块列表、以及阶段偏好
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// 主体标识（课程 / 专业 ID）
    pub subject_id: String,
    /// 工作流步骤编号
    pub stage_id: u8,
    #[serde(default)]
    pub context: GenerationContext,
    /// 按顺序处理的模块
    #[serde(default)]
    pub units: Vec<Unit>,
    pub preferences: Preferences,
}

impl GenerationRequest {
    /// 按固定顺序列出本次请求需要执行的阶段
    pub fn requested_stages(&self) -> Vec<StageKind> {
        StageKind::ORDER
            .into_iter()
            .filter(|stage| self.preferences.is_requested(*stage))
            .collect()
    }
}

/// 调用方拥有的上下文数据，编排器只透传给提示词
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationContext {
    #[serde(default)]
    pub program: JsonValue,
    #[serde(default)]
    pub competency: JsonValue,
    #[serde(default)]
    pub course: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_description: Option<String>,
}

/// 一个迭代单元（通常是课程模块）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Unit {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: None,
        }
    }
}

/// 阶段偏好：为 None 的阶段不执行
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formative: Option<AssessmentPrefs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summative: Option<AssessmentPrefs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<SamplePrefs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedPrefs>,
}

impl Preferences {
    pub fn is_requested(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::Formative => self.formative.is_some(),
            StageKind::Summative => self.summative.is_some(),
            StageKind::Samples => self.samples.is_some(),
            StageKind::Derived => self.derived.is_some(),
        }
    }
}

/// 形成性 / 总结性评价的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentPrefs {
    /// 每个模块生成的数量
    pub per_unit: u8,
    /// 期望的评价形式（如 quiz、project、rubric）
    #[serde(default)]
    pub formats: Vec<String>,
    /// 在总成绩中的权重（百分比）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// 样题参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePrefs {
    /// 每个题型生成的数量
    pub per_category: u8,
}

/// 派生结构参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedPrefs {
    pub formats: Vec<DerivedFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_stages_follow_fixed_order() {
        let request = GenerationRequest {
            subject_id: "course-1".to_string(),
            stage_id: 3,
            context: GenerationContext::default(),
            units: vec![Unit::new("m1", "模块一")],
            preferences: Preferences {
                derived: Some(DerivedPrefs {
                    formats: vec![DerivedFormat::QuestionBank],
                }),
                formative: Some(AssessmentPrefs {
                    per_unit: 2,
                    formats: vec![],
                    weight: None,
                }),
                ..Preferences::default()
            },
        };

        assert_eq!(
            request.requested_stages(),
            vec![StageKind::Formative, StageKind::Derived]
        );
    }

    #[test]
    fn test_deserialize_minimal_request() {
        let json = r#"{
            "subject_id": "c-9",
            "stage_id": 2,
            "units": [{"id": "u1", "title": "导论"}],
            "preferences": {"samples": {"per_category": 1}}
        }"#;
        let request: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.units[0].summary, None);
        assert!(request.preferences.is_requested(StageKind::Samples));
        assert!(!request.preferences.is_requested(StageKind::Formative));
        assert!(request.context.program.is_null());
    }
}
