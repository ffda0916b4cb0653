//! 按模块迭代的阶段计划：形成性评价、总结性评价，以及派生结构
//!
//! 模型只返回内容本身，模块 ID、权重、格式这些由计划补上。

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::clients::{GenerationError, GenerationPrompt};
use crate::config::Config;
use crate::models::artifact::{Artifact, DerivedStructure, FormativeAssessment, SummativeAssessment};
use crate::models::request::{AssessmentPrefs, GenerationContext, Unit};
use crate::models::stage::{DerivedFormat, StageKind};
use crate::services::output_parser::parse_typed;
use crate::services::prompt_builder;
use crate::services::CallBudget;
use crate::workflow::stage_batcher::StagePlan;

/// 各阶段的单次调用预算
pub fn budget_for(config: &Config, stage: StageKind) -> CallBudget {
    let (max_tokens, timeout_secs) = match stage {
        StageKind::Formative => (config.formative_max_tokens, config.formative_timeout_secs),
        StageKind::Summative => (config.summative_max_tokens, config.summative_timeout_secs),
        // 样题按题型各有预算，这里只是默认值
        StageKind::Samples => (1500, config.sample_timeout_secs),
        StageKind::Derived => (config.derived_max_tokens, config.derived_timeout_secs),
    };
    CallBudget {
        max_tokens,
        timeout: Duration::from_secs(timeout_secs),
    }
}

/// 模型返回的评价草稿
#[derive(Debug, Deserialize)]
struct AssessmentDraft {
    title: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    criteria: Vec<String>,
}

/// 形成性 / 总结性评价计划，每个模块一次调用
pub struct AssessmentPlan<'a> {
    stage: StageKind,
    context: &'a GenerationContext,
    prefs: &'a AssessmentPrefs,
    budget: CallBudget,
}

impl<'a> AssessmentPlan<'a> {
    pub fn formative(
        context: &'a GenerationContext,
        prefs: &'a AssessmentPrefs,
        budget: CallBudget,
    ) -> Self {
        Self {
            stage: StageKind::Formative,
            context,
            prefs,
            budget,
        }
    }

    pub fn summative(
        context: &'a GenerationContext,
        prefs: &'a AssessmentPrefs,
        budget: CallBudget,
    ) -> Self {
        Self {
            stage: StageKind::Summative,
            context,
            prefs,
            budget,
        }
    }

    /// 模型没给格式时按偏好轮流分配
    fn default_format(&self, index: usize) -> String {
        if self.prefs.formats.is_empty() {
            "general".to_string()
        } else {
            self.prefs.formats[index % self.prefs.formats.len()].clone()
        }
    }
}

impl StagePlan for AssessmentPlan<'_> {
    type Item = Unit;

    fn stage(&self) -> StageKind {
        self.stage
    }

    fn item_id(&self, unit: &Unit) -> String {
        unit.id.clone()
    }

    fn item_label(&self, unit: &Unit) -> String {
        unit.title.clone()
    }

    fn budget(&self, _unit: &Unit) -> CallBudget {
        self.budget
    }

    fn prompt(&self, unit: &Unit) -> GenerationPrompt {
        prompt_builder::assessment_prompt(self.stage, self.context, unit, self.prefs)
    }

    fn parse(&self, unit: &Unit, output: &str) -> Result<Vec<Artifact>, GenerationError> {
        let label = format!("[{} {}]", self.stage.name(), unit.id);
        let drafts: Vec<AssessmentDraft> =
            parse_typed(output, self.prefs.per_unit as usize, &label)?;

        let artifacts = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let format = draft.format.unwrap_or_else(|| self.default_format(i));
                match self.stage {
                    StageKind::Summative => Artifact::Summative(SummativeAssessment {
                        unit_id: unit.id.clone(),
                        title: draft.title,
                        format,
                        instructions: draft.instructions,
                        criteria: draft.criteria,
                        weight: self.prefs.weight,
                    }),
                    _ => Artifact::Formative(FormativeAssessment {
                        unit_id: unit.id.clone(),
                        title: draft.title,
                        format,
                        instructions: draft.instructions,
                        questions: draft.questions,
                        weight: self.prefs.weight,
                    }),
                }
            })
            .collect();
        Ok(artifacts)
    }
}

#[derive(Debug, Deserialize)]
struct DerivedDraft {
    title: String,
    #[serde(default)]
    body: JsonValue,
}

/// 派生结构计划，每种目标格式一次调用
///
/// 输入是本次运行前面阶段已经产出的内容
pub struct DerivedPlan<'a> {
    context: &'a GenerationContext,
    prior: &'a [Artifact],
    budget: CallBudget,
}

impl<'a> DerivedPlan<'a> {
    pub fn new(context: &'a GenerationContext, prior: &'a [Artifact], budget: CallBudget) -> Self {
        Self {
            context,
            prior,
            budget,
        }
    }
}

impl StagePlan for DerivedPlan<'_> {
    type Item = DerivedFormat;

    fn stage(&self) -> StageKind {
        StageKind::Derived
    }

    fn item_id(&self, format: &DerivedFormat) -> String {
        format.as_str().to_string()
    }

    fn item_label(&self, format: &DerivedFormat) -> String {
        format.name().to_string()
    }

    fn budget(&self, _format: &DerivedFormat) -> CallBudget {
        self.budget
    }

    fn prompt(&self, format: &DerivedFormat) -> GenerationPrompt {
        prompt_builder::derived_prompt(self.context, *format, self.prior)
    }

    fn parse(&self, format: &DerivedFormat, output: &str) -> Result<Vec<Artifact>, GenerationError> {
        let label = format!("[派生结构 {}]", format.as_str());
        let drafts: Vec<DerivedDraft> = parse_typed(output, 1, &label)?;
        Ok(drafts
            .into_iter()
            .map(|draft| {
                Artifact::Derived(DerivedStructure {
                    format: *format,
                    title: draft.title,
                    body: draft.body,
                })
            })
            .collect())
    }
}
