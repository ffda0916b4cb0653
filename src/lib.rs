//! # Assessment Orchestrator
//!
//! 分阶段生成课程评价方案的编排引擎：按阶段、按模块把一次长时间的生成任务
//! 拆成许多次有界的模型调用，遵守调用预算和限流，容忍部分失败，并实时输出进度。
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 生成服务的唯一出口
//! - `GenerationClient` - `generate(prompt, max_tokens, timeout)` 能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单次调用
//! - `retry` / `pacing` - 有界调用、重试退避、调用节流
//! - `prompt_builder` / `output_parser` - 提示词与结果解析
//! - `result_store` - 结果持久化
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个阶段"的完整处理流程
//! - `StageBatcher` - 串行迭代（节流 → 调用 → 重试 → 解析 → 进度）
//! - `StagePlan` - 每个阶段迭代什么、怎么问、怎么解析
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/stage_orchestrator` - 一次运行的阶段调度
//! - `orchestrator/run_registry` - 运行登记、广播、取消、清扫
//! - `orchestrator/service` - 同步与流式两种调用方式
//!
//! 进度事件（`progress/`）贯穿各层，编排器只依赖 `ProgressSink`。
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod services;
pub mod testing;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{GenerationClient, GenerationError, GenerationPrompt, OpenAiGenerationClient};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Artifact, GenerationRequest, GenerationResponse, RunSummary, StageKind};
pub use orchestrator::{App, GenerationService, RunKey, RunRegistry, StageOrchestrator};
pub use progress::{ProgressEvent, ProgressSink};
