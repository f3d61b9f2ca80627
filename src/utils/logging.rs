/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::time::Duration;
use tracing::info;

/// 记录运行开始信息
///
/// # 参数
/// - `mode`: 运行模式描述
/// - `apps`: 应用数量
/// - `pairs`: 模型组合数量
pub fn log_run_start(mode: &str, apps: usize, pairs: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始运行 - {}", mode);
    info!("📊 应用数: {}，模型组合数: {}", apps, pairs);
    info!("{}", "=".repeat(60));
}

/// 记录单个应用开始处理
///
/// # 参数
/// - `index`: 当前序号（从 1 开始）
/// - `total`: 应用总数
/// - `name`: 应用名称
/// - `app_id`: 应用 ID
pub fn log_app_start(index: usize, total: usize, name: &str, app_id: u32) {
    info!("\n{}", "=".repeat(60));
    info!("📦 处理第 {}/{} 个应用: {} ({})", index, total, name, app_id);
    info!("{}", "=".repeat(60));
}

/// 记录抓取结束统计
pub fn log_crawl_summary(app_id: u32, collected: usize, requests: usize, errors: usize, elapsed: Duration) {
    info!("{}", "─".repeat(60));
    info!(
        "✓ 应用 {} 抓取结束: {} 条评论，{} 次请求，{} 次错误，用时 {}",
        app_id,
        collected,
        requests,
        errors,
        format_elapsed(elapsed)
    );
    info!("{}", "─".repeat(60));
}

/// 打印运行结束信息
///
/// # 参数
/// - `stopped`: 是否被用户中止
pub fn log_run_finished(stopped: bool) {
    info!("\n{}", "=".repeat(60));
    if stopped {
        info!("⏹️ 运行已按请求停止");
    } else {
        info!("📊 全部处理完成");
    }
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
}

/// 将耗时格式化为 `MM:SS`，超过一小时为 `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
