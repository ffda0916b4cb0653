//! 进度事件
//!
//! 序列化时使用 `type` 字段区分：`connected` / `progress` / `data` /
//! `complete` / `error`。一次运行以且仅以一个 `complete` 或 `error` 结束。

use serde::{Deserialize, Serialize};

use crate::models::artifact::Artifact;
use crate::models::response::{GenerationResponse, RunSummary};
use crate::models::stage::StageKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 流已建立
    Connected,
    /// 单个迭代项处理完成
    #[serde(rename_all = "camelCase")]
    Progress {
        stage: StageKind,
        unit_label: String,
        completed: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },
    /// 一个阶段新产出的内容（只含本阶段，不含累计结果）
    #[serde(rename_all = "camelCase")]
    Data {
        stage: StageKind,
        partial_artifacts: Vec<Artifact>,
    },
    /// 运行成功结束
    Complete {
        response: Box<GenerationResponse>,
        summary: RunSummary,
    },
    /// 运行失败结束
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<StageKind>,
        message: String,
    },
}

impl ProgressEvent {
    /// 是否为终止事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    /// 协议中的 `type` 值
    pub fn type_name(&self) -> &'static str {
        match self {
            ProgressEvent::Connected => "connected",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Data { .. } => "data",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn error(stage: Option<StageKind>, message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            stage,
            message: message.into(),
        }
    }
}
