//! 业务能力层（Services）
//!
//! 每个模块描述"我能做什么"，只处理单次调用或单份结果，不关心阶段流程。

pub mod output_parser;
pub mod pacing;
pub mod prompt_builder;
pub mod result_store;
pub mod retry;

pub use pacing::{FixedDelay, NoPacing, PacingPolicy};
pub use result_store::{FileResultStore, MemoryResultStore, ResultStore};
pub use retry::{call_with_retry, CallBudget, CallOutcome, RetryPolicy};
