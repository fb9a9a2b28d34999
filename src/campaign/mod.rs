//! 整体流程编排。
//!
//! 登录 → 发现相册（或使用命令行给出的列表）→ 抓取占位图指纹 → 逐个相册下载。
//! 跨相册维护连续失败计数，达到上限时强制恢复会话；每处理 N 个相册重建一次浏览器实例。

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::base_system::album_paths::AlbumReference;
use crate::base_system::backoff::RetryPolicy;
use crate::base_system::context::Config;
use crate::base_system::pacing::Pacer;
use crate::crawler::{CrawlError, PaginationCrawler};
use crate::download::album::extract_image_urls;
use crate::download::{AlbumError, AlbumReport, DownloadEngine, OutcomeCounts, PlaceholderOracle};
use crate::session::{SessionController, SessionError};

mod progress;

use progress::AlbumProgress;

/// 连续失败多少个相册后强制恢复会话。
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("initial login failed: {0}")]
    LoginFailed(#[source] SessionError),
    #[error("album discovery failed: {0}")]
    Discovery(#[from] CrawlError),
    #[error("session lost after album {after_album} and could not be recovered: {source}")]
    SessionLost {
        after_album: usize,
        #[source]
        source: SessionError,
    },
    #[error("browser recycle after album {after_album} failed and re-login did not recover: {source}")]
    RecycleFailed {
        after_album: usize,
        #[source]
        source: SessionError,
    },
}

#[derive(Debug, Clone)]
pub struct CampaignOptions {
    pub base_url: String,
    pub feed_url: String,
    pub download_root: PathBuf,
    pub max_album_pages: u32,
    /// 每处理多少个相册重建一次浏览器实例，0 为不重建
    pub restart_interval: usize,
    pub show_progress: bool,
}

impl CampaignOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            feed_url: config.feed_url(),
            download_root: config.download_root(),
            max_album_pages: u32::try_from(config.max_album_pages).unwrap_or(u32::MAX),
            restart_interval: config.browser_restart_interval,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Completed,
    NoAlbums,
}

#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub status: CampaignStatus,
    pub albums_total: usize,
    pub albums_processed: usize,
    pub albums_failed: usize,
    pub counts: OutcomeCounts,
    pub recycles: usize,
    pub relogins: usize,
}

impl CampaignSummary {
    fn new(albums_total: usize) -> Self {
        Self {
            status: CampaignStatus::Completed,
            albums_total,
            albums_processed: 0,
            albums_failed: 0,
            counts: OutcomeCounts::default(),
            recycles: 0,
            relogins: 0,
        }
    }

    fn record(&mut self, report: &AlbumReport) {
        self.albums_processed += 1;
        self.counts += report.counts;
    }
}

impl fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "相册 {}/{}（失败 {}），{}；重建 {} 次，重新登录 {} 次",
            self.albums_processed,
            self.albums_total,
            self.albums_failed,
            self.counts,
            self.recycles,
            self.relogins
        )
    }
}

pub struct Campaign<'a> {
    session: SessionController<'a>,
    pacer: &'a dyn Pacer,
    policy: RetryPolicy,
    options: CampaignOptions,
    oracle: PlaceholderOracle,
    /// 占位图样本地址（去掉查询参数），每代会话都用它重新抓指纹
    sample_url: Option<String>,
}

impl<'a> Campaign<'a> {
    pub fn new(
        session: SessionController<'a>,
        pacer: &'a dyn Pacer,
        policy: RetryPolicy,
        options: CampaignOptions,
    ) -> Self {
        Self {
            session,
            pacer,
            policy,
            options,
            oracle: PlaceholderOracle::default(),
            sample_url: None,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &SessionController<'a> {
        &self.session
    }

    /// `explicit` 非空时只处理这些相册，不再爬取 feed。
    pub fn run(&mut self, explicit: &[String]) -> Result<CampaignSummary, CampaignError> {
        self.session
            .login(self.pacer)
            .map_err(CampaignError::LoginFailed)?;

        let albums = if explicit.is_empty() {
            self.discover()?
        } else {
            let albums = explicit_albums(explicit);
            info!(target: "campaign", "=== 处理命令行指定的 {} 个相册 ===", albums.len());
            albums
        };

        let total = albums.len();
        let mut summary = CampaignSummary::new(total);
        let Some(first) = albums.first() else {
            warn!(target: "campaign", "没有找到任何相册");
            summary.status = CampaignStatus::NoAlbums;
            return Ok(summary);
        };
        self.prepare_placeholder(first);

        info!(target: "campaign", "=== 处理 {} 个相册 ===", total);
        let progress = AlbumProgress::new(total, self.options.show_progress);
        let mut failures = 0usize;

        for (i, album) in albums.iter().enumerate() {
            let index = i + 1;
            info!(target: "campaign", "[{}/{}] {}", index, total, album.canonical_url);
            progress.start(&album.label());

            match self.process(album) {
                Ok(report) => {
                    summary.record(&report);
                    if report.auth_failed {
                        self.relogin_after_auth_failure(&mut failures, &mut summary);
                    } else {
                        failures = 0;
                    }
                }
                Err(e) => {
                    warn!(target: "campaign", "相册 {} 处理失败: {e}", album.label());
                    summary.albums_failed += 1;
                    if e.is_auth_failure() {
                        self.relogin_after_auth_failure(&mut failures, &mut summary);
                    } else {
                        failures += 1;
                    }
                }
            }
            progress.advance();

            if failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(target: "campaign", "连续 {} 个相册失败，尝试恢复会话", failures);
                if let Err(e) = self.session.ensure_established(self.pacer) {
                    error!(target: "campaign", "会话无法恢复，停止: {e}");
                    info!(target: "campaign", "中止时统计: {summary}");
                    return Err(CampaignError::SessionLost {
                        after_album: index,
                        source: e,
                    });
                }
                failures = 0;
            }

            if self.should_recycle(index, total)
                && let Err(e) = self.recycle(index, &mut summary)
            {
                info!(target: "campaign", "中止时统计: {summary}");
                return Err(e);
            }
        }
        progress.finish();

        info!(target: "campaign", "=== 完成: {summary} ===");
        Ok(summary)
    }

    fn discover(&mut self) -> Result<Vec<AlbumReference>, CampaignError> {
        let crawler = PaginationCrawler::new(
            self.policy,
            self.pacer,
            &self.options.base_url,
            self.options.feed_url.clone(),
            self.options.max_album_pages,
        )?
        .with_progress(self.options.show_progress);
        let report = crawler.discover_albums(self.session.surface())?;
        Ok(report.albums)
    }

    fn process(&mut self, album: &AlbumReference) -> Result<AlbumReport, AlbumError> {
        let engine = DownloadEngine::new(
            self.policy,
            self.pacer,
            &self.oracle,
            &self.options.download_root,
        );
        engine.process_album(self.session.surface(), album)
    }

    /// 用第一个相册的第一张图（去掉查询参数后不带凭据请求）抓取占位图指纹。
    fn prepare_placeholder(&mut self, first: &AlbumReference) {
        info!(target: "campaign", "=== 获取占位图样本 ===");
        let sample = {
            let engine = DownloadEngine::new(
                self.policy,
                self.pacer,
                &self.oracle,
                &self.options.download_root,
            );
            match engine.load_album_page(self.session.surface(), &first.canonical_url) {
                Ok(()) => extract_image_urls(self.session.surface()).into_iter().next(),
                Err(e) => {
                    warn!(target: "campaign", "打开样本相册失败: {e}");
                    None
                }
            }
        };

        match sample {
            Some(url) => {
                let base = url.split('?').next().unwrap_or(&url).to_string();
                self.sample_url = Some(base);
                self.recapture_placeholder();
            }
            None => warn!(target: "campaign", "未能取得样本图片，占位图检测已关闭"),
        }
    }

    fn recapture_placeholder(&mut self) {
        let Some(url) = self.sample_url.as_deref() else {
            return;
        };
        let generation = self.session.generation();
        if let Err(e) = self.oracle.capture(self.session.surface(), url, generation) {
            warn!(target: "campaign", "抓取占位图指纹失败，第 {generation} 代会话不做占位图检测: {e}");
        }
    }

    fn relogin_after_auth_failure(&mut self, failures: &mut usize, summary: &mut CampaignSummary) {
        info!(target: "campaign", "检测到登录失效，重新登录");
        match self.session.login(self.pacer) {
            Ok(()) => {
                summary.relogins += 1;
                *failures = 0;
            }
            Err(e) => {
                warn!(target: "campaign", "重新登录失败: {e}");
                *failures += 1;
            }
        }
    }

    fn should_recycle(&self, index: usize, total: usize) -> bool {
        let interval = self.options.restart_interval;
        interval > 0 && index % interval == 0 && index < total
    }

    fn recycle(&mut self, index: usize, summary: &mut CampaignSummary) -> Result<(), CampaignError> {
        match self.session.recycle(&mut self.oracle, self.pacer) {
            Ok(()) => {
                summary.recycles += 1;
                self.recapture_placeholder();
                Ok(())
            }
            Err(e) => {
                warn!(target: "campaign", "重建浏览器实例失败: {e}，尝试直接重新登录");
                match self.session.login(self.pacer) {
                    Ok(()) => {
                        summary.relogins += 1;
                        self.recapture_placeholder();
                        Ok(())
                    }
                    Err(e) => {
                        error!(target: "campaign", "无法恢复会话，停止: {e}");
                        Err(CampaignError::RecycleFailed {
                            after_album: index,
                            source: e,
                        })
                    }
                }
            }
        }
    }
}

/// 规范化并去重，保持原有顺序。
fn explicit_albums(urls: &[String]) -> Vec<AlbumReference> {
    let mut seen = HashSet::new();
    urls.iter()
        .map(|u| AlbumReference::from_url(u))
        .filter(|a| seen.insert(a.canonical_url.clone()))
        .collect()
}
