//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行的调度和生命周期，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `stage_orchestrator` - 阶段编排器
//! - 校验请求
//! - 按固定顺序执行请求的阶段
//! - 每个阶段结束后发出 `data` 事件
//! - 判定必需阶段失败、处理取消
//! - 汇总、持久化、发出 `complete`
//!
//! ### `run_registry` - 运行登记表
//! - 同一个 (科目, 步骤) 同时只允许一个运行
//! - 广播事件给任意数量的观察者
//! - 取消、标记失败、清扫长时间没有进展的运行
//!
//! ### `service` - 对外的同步 / 流式调用方式
//!
//! ### `app` - 命令行应用入口
//!
//! ## 层次关系
//!
//! ```text
//! app / service (处理请求)
//!     ↓
//! stage_orchestrator (处理 Vec<Stage>)
//!     ↓
//! workflow::StageBatcher (处理 Vec<Item>)
//!     ↓
//! services (能力层：retry / pacing / prompt / parse / store)
//!     ↓
//! clients (生成服务)
//! ```

pub mod app;
pub mod run_registry;
pub mod service;
pub mod stage_orchestrator;

// 重新导出主要类型
pub use app::App;
pub use run_registry::{ProgressStream, RunHandle, RunKey, RunRegistry};
pub use service::GenerationService;
pub use stage_orchestrator::StageOrchestrator;
