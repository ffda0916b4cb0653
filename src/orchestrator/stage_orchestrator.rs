//! 阶段编排器 - 编排层
//!
//! ## 职责
//!
//! 驱动一次完整的生成运行：
//!
//! 1. **请求校验**：不合法的请求直接以 `error` 结束，不发起任何调用
//! 2. **阶段调度**：按 形成性 → 总结性 → 样题 → 派生 的固定顺序执行请求的阶段
//! 3. **增量输出**：每个阶段结束后发出一个只含本阶段产物的 `data` 事件
//! 4. **失败判定**：必需阶段一个产物都没有时整个运行失败；可选阶段只记录
//! 5. **收尾**：汇总、持久化一次、发出 `complete`
//!
//! 每次运行恰好发出一个终止事件（`complete` 或 `error`）。
//! 编排器只依赖 `ProgressSink`，不关心调用方是同步还是流式。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::GenerationClient;
use crate::config::Config;
use crate::error::{AggregateError, AppError, AppResult};
use crate::models::artifact::Artifact;
use crate::models::request::GenerationRequest;
use crate::models::response::GenerationResponse;
use crate::models::stage::StageKind;
use crate::models::validation::{validate_request, ValidationRules};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::services::ResultStore;
use crate::utils::logging::log_run_summary;
use crate::workflow::{
    budget_for, run_sample_batch, AssessmentPlan, BatchOutcome, DerivedPlan, RunCtx,
    SamplePlan, StageBatcher,
};

/// 阶段编排器
///
/// 不持有运行状态，可以同时驱动多个互不相关的运行
#[derive(Clone)]
pub struct StageOrchestrator {
    batcher: StageBatcher,
    store: Arc<dyn ResultStore>,
    config: Config,
    rules: ValidationRules,
}

impl StageOrchestrator {
    pub fn new(batcher: StageBatcher, store: Arc<dyn ResultStore>, config: Config) -> Self {
        let rules = ValidationRules {
            require_description: config.require_description,
        };
        Self {
            batcher,
            store,
            config,
            rules,
        }
    }

    /// 使用配置中的节流、重试和期限创建
    pub fn from_config(
        client: Arc<dyn GenerationClient>,
        store: Arc<dyn ResultStore>,
        config: Config,
    ) -> Self {
        let batcher = StageBatcher::from_config(client, &config);
        Self::new(batcher, store, config)
    }

    /// 执行一次完整运行
    ///
    /// 成功时返回汇总结果；无论成功失败，`sink` 都恰好收到一个终止事件
    pub async fn run(
        &self,
        request: &GenerationRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> AppResult<GenerationResponse> {
        let ctx = RunCtx::for_request(request);

        if let Err(e) = validate_request(request, self.rules) {
            warn!("{} ❌ 请求校验失败: {}", ctx, e);
            sink.emit(ProgressEvent::error(None, e.to_string()));
            return Err(e.into());
        }

        let stages = request.requested_stages();
        info!(
            "{} 🚀 开始生成: {} 个模块，阶段 {:?}",
            ctx,
            request.units.len(),
            stages.iter().map(|s| s.as_str()).collect::<Vec<_>>()
        );

        let mut response = GenerationResponse::new(request.subject_id.clone(), request.stage_id);

        for stage in stages {
            let Some(BatchOutcome { result, cancelled }) = self
                .run_stage(stage, request, &response, &ctx, sink, cancel)
                .await
            else {
                continue;
            };

            if cancelled {
                warn!("{} 🛑 运行在{}阶段被取消", ctx, stage.name());
                sink.emit(ProgressEvent::error(Some(stage), "运行已取消"));
                return Err(AppError::Cancelled { stage: Some(stage) });
            }

            if stage.is_required() && result.artifacts.is_empty() {
                let aggregate = AggregateError::from_stage(&result);
                error!("{} ❌ {}", ctx, aggregate);
                sink.emit(ProgressEvent::error(Some(stage), aggregate.to_string()));
                return Err(aggregate.into());
            }

            if !result.failed_items().is_empty() {
                warn!(
                    "{} ⚠️ {}阶段有 {} 项失败，继续后续阶段",
                    ctx,
                    stage.name(),
                    result.failed_items().len()
                );
            }

            sink.emit(ProgressEvent::Data {
                stage,
                partial_artifacts: result.artifacts.clone(),
            });
            response.stages.push(result);
        }

        // 最后一项进行中被取消或被登记表标记失败时，结果不再保存也不算完成
        if cancel.is_cancelled() {
            warn!("{} 🛑 运行在收尾前被终止，不保存结果", ctx);
            sink.emit(ProgressEvent::error(None, "运行已取消"));
            return Err(AppError::Cancelled { stage: None });
        }

        response.generated_at = chrono::Utc::now();

        let persisted = match self
            .store
            .save_result(&request.subject_id, request.stage_id, &response)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                // 持久化失败不影响本次运行的结果
                error!("{} ❌ 保存结果失败: {}", ctx, e);
                false
            }
        };

        let summary = response.summarize(persisted);
        log_run_summary(&ctx.to_string(), &summary);

        sink.emit(ProgressEvent::Complete {
            response: Box::new(response.clone()),
            summary,
        });
        Ok(response)
    }

    /// 执行单个阶段，未请求的阶段返回 `None`
    async fn run_stage(
        &self,
        stage: StageKind,
        request: &GenerationRequest,
        response: &GenerationResponse,
        ctx: &RunCtx,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Option<BatchOutcome> {
        let preferences = &request.preferences;
        let budget = budget_for(&self.config, stage);

        let outcome = match stage {
            StageKind::Formative => {
                let prefs = preferences.formative.as_ref()?;
                let plan = AssessmentPlan::formative(&request.context, prefs, budget);
                self.batcher
                    .run_batch(&plan, &request.units, ctx, sink, cancel)
                    .await
            }
            StageKind::Summative => {
                let prefs = preferences.summative.as_ref()?;
                let plan = AssessmentPlan::summative(&request.context, prefs, budget);
                self.batcher
                    .run_batch(&plan, &request.units, ctx, sink, cancel)
                    .await
            }
            StageKind::Samples => {
                let prefs = preferences.samples.as_ref()?;
                let plan = SamplePlan::new(&request.context, &request.units, prefs, &self.config);
                run_sample_batch(&self.batcher, &plan, ctx, sink, cancel).await
            }
            StageKind::Derived => {
                let prefs = preferences.derived.as_ref()?;
                let prior: Vec<Artifact> = response.artifacts().cloned().collect();
                let plan = DerivedPlan::new(&request.context, &prior, budget);
                self.batcher
                    .run_batch(&plan, &prefs.formats, ctx, sink, cancel)
                    .await
            }
        };
        Some(outcome)
    }
}
