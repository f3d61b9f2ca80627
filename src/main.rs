use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use review_analyser::clients::{LlmBackendFactory, SteamReviewFeed};
use review_analyser::{logger, Config, Orchestrator, ProgressEvent, RunOverrides};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "review-analyser", version, about = "抓取并分析 Steam 评论")]
struct Cli {
    /// 配置文件路径
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 只抓取评论
    Scrape {
        /// 完整抓取（不限条数）
        #[arg(long)]
        complete: bool,
    },
    /// 抓取（或复用已有评论）并分析
    Analyse {
        /// 完整抓取并分析全部评论
        #[arg(long)]
        complete: bool,
        /// 跳过抓取，只使用已有的原始评论文件
        #[arg(long)]
        skip_scraping: bool,
        /// 每个应用、每个模型分析的评论上限
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init();
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load(&cli.config)
        .with_context(|| format!("无法加载配置: {}", cli.config.display()))?;
    let language = config.fetching.language.clone();

    let feed = Arc::new(SteamReviewFeed::new(language)?);
    let (mut orchestrator, events) =
        Orchestrator::new(config, feed, Arc::new(LlmBackendFactory));

    let printer = tokio::spawn(print_events(events));

    match cli.command {
        Command::Scrape { complete } => orchestrator.start_scraping(RunOverrides {
            complete_scraping: complete.then_some(true),
            ..Default::default()
        })?,
        Command::Analyse {
            complete,
            skip_scraping,
            limit,
        } => orchestrator.start_analysis(RunOverrides {
            complete_scraping: complete.then_some(true),
            skip_scraping: skip_scraping.then_some(true),
            reviews_to_analyze: limit,
        })?,
    }

    let interrupted = tokio::select! {
        _ = orchestrator.wait() => false,
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("⏹️ 收到 Ctrl-C，正在停止...");
                true
            }
            Err(e) => {
                warn!("无法监听 Ctrl-C: {}", e);
                false
            }
        },
    };
    if interrupted {
        orchestrator.stop();
    }
    orchestrator.wait().await;

    // 编排器释放后事件通道关闭，打印任务随之结束
    drop(orchestrator);
    printer.await?;

    Ok(())
}

/// 事件按顺序以 JSON 行输出到 stdout
async fn print_events(mut events: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("事件序列化失败: {}", e),
        }
    }
}
