//! 样题批处理 - 流程层
//!
//! 与按模块迭代的阶段不同，样题按固定的五种题型迭代，
//! 每种题型有各自的 token 预算和超时。串行、重试、失败继续的语义不变。

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::clients::{GenerationError, GenerationPrompt};
use crate::config::Config;
use crate::models::artifact::{Artifact, SampleQuestion};
use crate::models::request::{GenerationContext, SamplePrefs, Unit};
use crate::models::stage::{QuestionCategory, StageKind};
use crate::progress::ProgressSink;
use crate::services::output_parser::parse_typed;
use crate::services::prompt_builder;
use crate::services::CallBudget;
use crate::workflow::run_ctx::RunCtx;
use crate::workflow::stage_batcher::{BatchOutcome, StageBatcher, StagePlan};

#[derive(Debug, Deserialize)]
struct SampleDraft {
    stem: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    explanation: String,
}

/// 样题计划
pub struct SamplePlan<'a> {
    context: &'a GenerationContext,
    units: &'a [Unit],
    prefs: &'a SamplePrefs,
    base_timeout: Duration,
}

impl<'a> SamplePlan<'a> {
    pub fn new(
        context: &'a GenerationContext,
        units: &'a [Unit],
        prefs: &'a SamplePrefs,
        config: &Config,
    ) -> Self {
        Self {
            context,
            units,
            prefs,
            base_timeout: Duration::from_secs(config.sample_timeout_secs),
        }
    }
}

/// 题型对应的调用预算：判断题最短，论述和案例分析最长
pub fn category_budget(category: QuestionCategory, base_timeout: Duration) -> CallBudget {
    let timeout = match category {
        QuestionCategory::TrueFalse => base_timeout * 2 / 3,
        QuestionCategory::MultipleChoice | QuestionCategory::ShortAnswer => base_timeout,
        QuestionCategory::Essay | QuestionCategory::CaseStudy => base_timeout * 3 / 2,
    };
    CallBudget {
        max_tokens: category.max_tokens(),
        timeout,
    }
}

impl StagePlan for SamplePlan<'_> {
    type Item = QuestionCategory;

    fn stage(&self) -> StageKind {
        StageKind::Samples
    }

    fn item_id(&self, category: &QuestionCategory) -> String {
        category.as_str().to_string()
    }

    fn item_label(&self, category: &QuestionCategory) -> String {
        category.name().to_string()
    }

    fn budget(&self, category: &QuestionCategory) -> CallBudget {
        category_budget(*category, self.base_timeout)
    }

    fn prompt(&self, category: &QuestionCategory) -> GenerationPrompt {
        prompt_builder::sample_prompt(self.context, self.units, *category, self.prefs.per_category)
    }

    fn parse(
        &self,
        category: &QuestionCategory,
        output: &str,
    ) -> Result<Vec<Artifact>, GenerationError> {
        let label = format!("[样题 {}]", category.as_str());
        let drafts: Vec<SampleDraft> =
            parse_typed(output, self.prefs.per_category as usize, &label)?;
        Ok(drafts
            .into_iter()
            .map(|draft| {
                Artifact::Sample(SampleQuestion {
                    category: *category,
                    stem: draft.stem,
                    options: draft.options,
                    answer: draft.answer,
                    explanation: draft.explanation,
                })
            })
            .collect())
    }
}

/// 依次为五种题型生成样题
pub async fn run_sample_batch(
    batcher: &StageBatcher,
    plan: &SamplePlan<'_>,
    ctx: &RunCtx,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> BatchOutcome {
    batcher
        .run_batch(plan, &QuestionCategory::ALL, ctx, sink, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::progress::CollectingSink;
    use crate::services::{NoPacing, RetryPolicy};
    use crate::testing::{generic_items_json, ScriptedClient};

    #[test]
    fn test_each_category_has_own_budget() {
        let base = Duration::from_secs(90);
        let tf = category_budget(QuestionCategory::TrueFalse, base);
        let essay = category_budget(QuestionCategory::Essay, base);

        assert_eq!(tf.timeout, Duration::from_secs(60));
        assert_eq!(essay.timeout, Duration::from_secs(135));
        assert!(essay.max_tokens > tf.max_tokens);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_batch_covers_all_categories_in_order() {
        let client = Arc::new(ScriptedClient::with_responder(|_| {
            crate::testing::Reply::Text(generic_items_json(3))
        }));
        let batcher = StageBatcher::new(client.clone(), Arc::new(NoPacing), RetryPolicy::default());
        let context = GenerationContext::default();
        let prefs = SamplePrefs { per_category: 2 };
        let plan = SamplePlan::new(&context, &[], &prefs, &Config::default());
        let sink = CollectingSink::new();

        let outcome = run_sample_batch(
            &batcher,
            &plan,
            &RunCtx::new("s", 2),
            &sink,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(client.calls(), 5);
        assert_eq!(outcome.result.artifacts.len(), 10);
        let categories: Vec<&str> = outcome
            .result
            .artifacts
            .iter()
            .map(|a| a.source_id())
            .collect();
        assert_eq!(&categories[..2], &["multiple_choice", "multiple_choice"]);
        assert_eq!(&categories[8..], &["case_study", "case_study"]);
        assert_eq!(sink.types().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_category_does_not_stop_others() {
        let client = Arc::new(ScriptedClient::with_responder(|prompt| {
            if prompt.user.contains("论述题") {
                crate::testing::Reply::Fail(GenerationError::service("上游 500"))
            } else {
                crate::testing::Reply::Text(generic_items_json(1))
            }
        }));
        let batcher = StageBatcher::new(client, Arc::new(NoPacing), RetryPolicy::default());
        let context = GenerationContext::default();
        let prefs = SamplePrefs { per_category: 1 };
        let plan = SamplePlan::new(&context, &[], &prefs, &Config::default());

        let outcome = run_sample_batch(
            &batcher,
            &plan,
            &RunCtx::new("s", 2),
            &CollectingSink::new(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.result.artifacts.len(), 4);
        assert_eq!(outcome.result.failed_items(), vec!["essay"]);
    }
}
