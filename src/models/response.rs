use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::artifact::Artifact;
use crate::models::stage::StageKind;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 调用或阶段超时（可重试）
    Timeout,
    /// 被限流（可重试）
    RateLimited,
    /// 上游服务错误（不重试）
    Service,
    /// 请求本身不合法（不重试）
    MalformedRequest,
    /// 返回内容无法解析（不重试）
    InvalidOutput,
}

impl FailureKind {
    /// 是否属于瞬时失败
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::RateLimited)
    }
}

/// 单个迭代项的处理状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded { artifacts: usize },
    Failed { kind: FailureKind, reason: String },
    /// 被取消或阶段期限已到，未发起调用
    Skipped { reason: String },
}

/// 单个迭代项的处理记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub label: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded { .. })
    }
}

/// 一个阶段的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub artifacts: Vec<Artifact>,
    pub outcomes: Vec<ItemOutcome>,
}

impl StageResult {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            artifacts: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// 失败（含跳过）的迭代项 ID，按处理顺序
    pub fn failed_items(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.item_id.as_str())
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

/// 汇总结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub subject_id: String,
    pub stage_id: u8,
    /// 按执行顺序排列
    pub stages: Vec<StageResult>,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResponse {
    pub fn new(subject_id: impl Into<String>, stage_id: u8) -> Self {
        Self {
            subject_id: subject_id.into(),
            stage_id,
            stages: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == kind)
    }

    /// 所有阶段的产物，按阶段顺序
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.stages.iter().flat_map(|s| s.artifacts.iter())
    }

    pub fn summarize(&self, persisted: bool) -> RunSummary {
        let mut summary = RunSummary {
            persisted,
            ..RunSummary::default()
        };

        for artifact in self.artifacts() {
            match artifact {
                Artifact::Formative(_) => summary.formative += 1,
                Artifact::Summative(_) => summary.summative += 1,
                Artifact::Sample(_) => summary.sample_questions += 1,
                Artifact::Derived(_) => summary.derived_structures += 1,
            }
            summary.total_artifacts += 1;
        }

        for stage in &self.stages {
            for outcome in &stage.outcomes {
                let reason = match &outcome.status {
                    ItemStatus::Succeeded { .. } => continue,
                    ItemStatus::Failed { reason, .. } | ItemStatus::Skipped { reason } => reason,
                };
                summary.failed_items.push(FailedItem {
                    stage: stage.stage,
                    item_id: outcome.item_id.clone(),
                    reason: reason.clone(),
                });
            }
        }

        summary
    }
}

/// 运行摘要：按类别计数 + 失败清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub formative: usize,
    pub summative: usize,
    pub sample_questions: usize,
    pub derived_structures: usize,
    pub total_artifacts: usize,
    pub failed_items: Vec<FailedItem>,
    /// 结果是否已交给持久化
    pub persisted: bool,
}

/// 失败清单中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub stage: StageKind,
    pub item_id: String,
    pub reason: String,
}
