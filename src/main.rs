//! Album Harvester：登录墙后相册的批量下载器。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试/停顿/路径/进程锁等基础设施
//! - `automation`：自动化界面抽象与 HTTP 实现
//! - `session`：登录、登录态校验与实例回收
//! - `crawler`：feed 分页展开与相册链接收集
//! - `download`：占位图识别、文件校验、单图下载与相册处理
//! - `campaign`：整体流程编排

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{error, info};

mod automation;
mod base_system;
mod campaign;
mod crawler;
mod download;
mod session;

use automation::{HttpSurface, SurfaceOptions};
use base_system::backoff::RetryPolicy;
use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::instance_lock::InstanceLock;
use base_system::logging::{LogOptions, LogSystem};
use base_system::pacing::pacer_for;
use campaign::{Campaign, CampaignOptions};
use session::SessionController;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "album-harvester")]
#[command(version, about = "Download every album behind a login wall, exactly once")]
struct Cli {
    /// 只处理这些相册（不爬取 feed）
    #[arg(value_name = "ALBUM_URLS")]
    album_urls: Vec<String>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 harvester.yml、logs 与进程锁）
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();

    // 先拿锁再初始化日志：第二个实例不能动正在写的 latest.log
    let lock_dir = data_dir.unwrap_or_else(|| Path::new("."));
    let lock = InstanceLock::try_acquire(lock_dir).context("acquire instance lock")?;

    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "Album Harvester v{}", VERSION);
    info!(target: "startup", "已获取进程锁: {}", lock.path().display());
    log.add_exit_hook(move || drop(lock));

    let config = load_or_create::<Config>(None, data_dir).context("load config")?;
    if !config.credentials.is_complete() {
        error!(target: "startup", "harvester.yml 中未配置 credentials.username / credentials.password");
    }

    let pacer = pacer_for(config.humanize);
    let policy = RetryPolicy::new(config.max_retries, config.retry_base_delay());
    let surface = HttpSurface::new(SurfaceOptions::from_config(&config))
        .map_err(|e| anyhow!("create automation surface: {e}"))?;
    let session = SessionController::new(
        Box::new(surface),
        &config.credentials,
        config.base_url.clone(),
        policy,
    );

    let mut campaign = Campaign::new(
        session,
        pacer.as_ref(),
        policy,
        CampaignOptions::from_config(&config),
    );
    match campaign.run(&cli.album_urls) {
        Ok(summary) => info!(target: "campaign", "结束: {summary}"),
        Err(e) => error!(target: "campaign", "运行中止: {e:#}"),
    }

    drop(campaign);
    log.safe_exit();
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    LogSystem::init_with_base(LogOptions::cli(debug), base_dir).map_err(|e| anyhow!(e))
}
