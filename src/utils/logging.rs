/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::response::RunSummary;
use crate::models::stage::StageKind;

/// 初始化全局日志
///
/// 优先使用 `RUST_LOG`，未设置时按 `verbose` 选择 debug 或 info。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `model`: 使用的模型名称
/// - `total`: 待处理的请求数量
pub fn log_startup(model: &str, total: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 分阶段评价生成模式");
    info!("🤖 模型: {}", model);
    info!("📋 待处理请求: {} 个", total);
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
pub fn log_stage_start(run: &str, stage: StageKind, total_items: usize) {
    info!("\n{}", "─".repeat(60));
    info!("{} 📦 开始{}阶段，共 {} 项", run, stage.name(), total_items);
}

/// 记录阶段完成
pub fn log_stage_complete(run: &str, stage: StageKind, artifacts: usize, failed: usize) {
    if failed == 0 {
        info!("{} ✓ {}阶段完成: 产出 {} 个", run, stage.name(), artifacts);
    } else {
        info!(
            "{} ✓ {}阶段完成: 产出 {} 个，失败 {} 项",
            run,
            stage.name(),
            artifacts,
            failed
        );
    }
    info!("{}", "─".repeat(60));
}

/// 打印单次运行的统计信息
pub fn log_run_summary(run: &str, summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("{} 📊 生成完成统计", run);
    info!(
        "形成性 {} / 总结性 {} / 样题 {} / 派生 {}",
        summary.formative, summary.summative, summary.sample_questions, summary.derived_structures
    );
    info!("❌ 失败项: {}", summary.failed_items.len());
    for item in &summary.failed_items {
        info!("   - [{}] {}: {}", item.stage.name(), item.item_id, item.reason);
    }
    info!("💾 已保存: {}", if summary.persisted { "是" } else { "否" });
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功数量
/// - `failed`: 失败数量
/// - `total`: 总数
/// - `results_dir`: 结果保存目录
pub fn print_final_stats(success: usize, failed: usize, total: usize, results_dir: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", results_dir);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
