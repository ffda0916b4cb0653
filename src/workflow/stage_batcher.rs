//! 阶段批处理 - 流程层
//!
//! 核心职责：定义"一个阶段"的完整处理流程
//!
//! 流程顺序（对每个迭代项）：
//! 1. 检查取消 → 节流等待
//! 2. 检查阶段期限
//! 3. 有界调用 + 重试 → 解析
//! 4. 成功：追加产物、发送进度；失败：记录后继续下一项
//!
//! 迭代项严格串行，同一运行任意时刻最多一个调用在进行中。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{GenerationClient, GenerationError, GenerationPrompt};
use crate::config::Config;
use crate::models::artifact::Artifact;
use crate::models::response::{FailureKind, ItemOutcome, ItemStatus, StageResult};
use crate::models::stage::StageKind;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::services::{call_with_retry, CallBudget, FixedDelay, PacingPolicy, RetryPolicy};
use crate::utils::logging::{log_stage_complete, log_stage_start};
use crate::workflow::run_ctx::RunCtx;

/// 一个阶段的执行计划
///
/// 描述"按什么迭代、每项怎么问、怎么解析"，批处理器负责其余一切
pub trait StagePlan: Send + Sync {
    type Item: Sync;

    fn stage(&self) -> StageKind;

    /// 迭代项标识，进入失败清单
    fn item_id(&self, item: &Self::Item) -> String;

    /// 进度事件中显示的名称
    fn item_label(&self, item: &Self::Item) -> String {
        self.item_id(item)
    }

    /// 单次调用预算
    fn budget(&self, item: &Self::Item) -> CallBudget;

    fn prompt(&self, item: &Self::Item) -> GenerationPrompt;

    /// 把模型输出解析为本阶段的产物
    fn parse(&self, item: &Self::Item, output: &str) -> Result<Vec<Artifact>, GenerationError>;
}

/// 批处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub result: StageResult,
    /// 是否因取消而提前结束
    pub cancelled: bool,
}

/// 阶段批处理器
///
/// - 持有生成客户端、节流策略和重试策略
/// - 不关心具体阶段，由 `StagePlan` 提供阶段相关的部分
#[derive(Clone)]
pub struct StageBatcher {
    client: Arc<dyn GenerationClient>,
    pacing: Arc<dyn PacingPolicy>,
    retry: RetryPolicy,
    stage_deadline: Option<Duration>,
}

impl StageBatcher {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        pacing: Arc<dyn PacingPolicy>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            pacing,
            retry,
            stage_deadline: None,
        }
    }

    pub fn from_config(client: Arc<dyn GenerationClient>, config: &Config) -> Self {
        Self::new(
            client,
            Arc::new(FixedDelay::from_config(config)),
            RetryPolicy::from_config(config),
        )
        .with_stage_deadline(config.stage_deadline())
    }

    /// 设置整个阶段的期限，超过后剩余迭代项直接记为超时
    pub fn with_stage_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.stage_deadline = deadline;
        self
    }

    /// 依次处理所有迭代项
    ///
    /// 单项失败不会中断阶段；取消只在迭代项之间生效
    pub async fn run_batch<P: StagePlan>(
        &self,
        plan: &P,
        items: &[P::Item],
        ctx: &RunCtx,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let stage = plan.stage();
        let total = items.len();
        let started = Instant::now();
        let mut result = StageResult::new(stage);
        let mut cancelled = false;

        log_stage_start(&ctx.to_string(), stage, total);

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                skip_remaining(&mut result, plan, &items[index..]);
                break;
            }

            let delay = self.pacing.delay_before(index);
            if !delay.is_zero() {
                debug!("{} ⏳ 等待 {:?} 后处理下一项", ctx, delay);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        skip_remaining(&mut result, plan, &items[index..]);
                        break;
                    }
                }
            }

            let budget = plan.budget(item);
            if let Some(deadline) = self.stage_deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    warn!(
                        "{} ⚠️ {}阶段超过 {} 秒期限，剩余 {} 项不再处理",
                        ctx,
                        stage.name(),
                        deadline.as_secs(),
                        total - index
                    );
                    for rest in &items[index..] {
                        result.outcomes.push(ItemOutcome {
                            item_id: plan.item_id(rest),
                            label: plan.item_label(rest),
                            status: ItemStatus::Failed {
                                kind: FailureKind::Timeout,
                                reason: format!("阶段超过 {} 秒期限", deadline.as_secs()),
                            },
                        });
                    }
                    break;
                }
            }

            let item_id = plan.item_id(item);
            let label = plan.item_label(item);
            let call_label = format!(
                "{} [{} {}/{} {}]",
                ctx,
                stage.name(),
                index + 1,
                total,
                label
            );

            let item_started = Instant::now();
            let prompt = plan.prompt(item);
            let outcome =
                call_with_retry(
                    self.client.as_ref(),
                    &prompt,
                    budget,
                    &self.retry,
                    self.stage_deadline.map(|d| started + d),
                    &call_label,
                )
                .await;
            let parsed = outcome.result.and_then(|text| plan.parse(item, &text));

            match parsed {
                Ok(artifacts) => {
                    info!(
                        "{} ✓ 生成 {} 个 (尝试 {} 次，耗时 {:.1}s)",
                        call_label,
                        artifacts.len(),
                        outcome.attempts,
                        item_started.elapsed().as_secs_f64()
                    );
                    result.outcomes.push(ItemOutcome {
                        item_id,
                        label: label.clone(),
                        status: ItemStatus::Succeeded {
                            artifacts: artifacts.len(),
                        },
                    });
                    result.artifacts.extend(artifacts);

                    let completed = index + 1;
                    sink.emit(ProgressEvent::Progress {
                        stage,
                        unit_label: label,
                        completed,
                        total,
                        eta_seconds: estimate_eta(started.elapsed(), completed, total),
                    });
                }
                Err(e) => {
                    error!("{} ❌ 处理失败，继续下一项: {}", call_label, e);
                    result.outcomes.push(ItemOutcome {
                        item_id,
                        label,
                        status: ItemStatus::Failed {
                            kind: e.kind(),
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        if cancelled {
            warn!("{} ⚠️ {}阶段被取消", ctx, stage.name());
        }
        let failed = result.outcomes.len() - result.succeeded_count();
        log_stage_complete(&ctx.to_string(), stage, result.artifacts.len(), failed);

        BatchOutcome { result, cancelled }
    }
}

fn skip_remaining<P: StagePlan>(result: &mut StageResult, plan: &P, rest: &[P::Item]) {
    for item in rest {
        result.outcomes.push(ItemOutcome {
            item_id: plan.item_id(item),
            label: plan.item_label(item),
            status: ItemStatus::Skipped {
                reason: "运行已取消".to_string(),
            },
        });
    }
}

/// 按已完成项的平均耗时估算剩余秒数
pub fn estimate_eta(elapsed: Duration, completed: usize, total: usize) -> Option<u64> {
    if completed == 0 || completed > total {
        return None;
    }
    let remaining = (total - completed) as f64;
    let mean = elapsed.as_secs_f64() / completed as f64;
    Some((mean * remaining).round() as u64)
}
