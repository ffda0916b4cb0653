//! 流程层（Workflow）
//!
//! - `run_ctx` - 日志上下文（科目 + 步骤）
//! - `stage_batcher` - 一个阶段的串行处理流程（节流 → 调用 → 重试 → 解析 → 进度）
//! - `stage_plans` - 按模块迭代的阶段与派生结构
//! - `sample_batcher` - 按题型迭代的样题阶段

pub mod run_ctx;
pub mod sample_batcher;
pub mod stage_batcher;
pub mod stage_plans;

pub use run_ctx::RunCtx;
pub use sample_batcher::{run_sample_batch, SamplePlan};
pub use stage_batcher::{BatchOutcome, StageBatcher, StagePlan};
pub use stage_plans::{budget_for, AssessmentPlan, DerivedPlan};
