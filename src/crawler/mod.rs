//! 分页爬取：反复展开 feed，最后一次性收集所有相册链接。
//!
//! 展开优先点击“加载更多”，没有时退回到滚动到底部并比较页面高度。
//! 达到页数上限（0 为不限）或连续 [`IDLE_LIMIT`] 次没有新内容时停止。

use std::collections::HashSet;

use anyhow::anyhow;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::automation::{AutomationSurface, SurfaceError, scripts};
use crate::base_system::album_paths::AlbumReference;
use crate::base_system::backoff::{self, AttemptError, Exhausted, RetryPolicy};
use crate::base_system::pacing::{self, Pacer};

pub mod filter;

pub const IDLE_LIMIT: u32 = 5;
const LOAD_MORE_SELECTOR: &str = "#load-more";

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid site url `{0}`")]
    SiteUrl(String),
    #[error("failed to load feed page {url}: {source}")]
    FeedLoad {
        url: String,
        #[source]
        source: Exhausted,
    },
    #[error("failed to collect links: {0}")]
    Harvest(#[source] SurfaceError),
    #[error("link collection script returned {0}, expected an array")]
    UnexpectedScriptResult(String),
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub albums: Vec<AlbumReference>,
    pub iterations: u32,
    pub limit_reached: bool,
    pub anchors_examined: usize,
}

pub struct PaginationCrawler<'a> {
    policy: RetryPolicy,
    pacer: &'a dyn Pacer,
    feed_url: String,
    domain: String,
    max_pages: u32,
    show_progress: bool,
}

impl<'a> PaginationCrawler<'a> {
    pub fn new(
        policy: RetryPolicy,
        pacer: &'a dyn Pacer,
        base_url: &str,
        feed_url: impl Into<String>,
        max_pages: u32,
    ) -> Result<Self, CrawlError> {
        let domain =
            filter::site_domain(base_url).ok_or_else(|| CrawlError::SiteUrl(base_url.to_string()))?;
        Ok(Self {
            policy,
            pacer,
            feed_url: feed_url.into(),
            domain,
            max_pages,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn discover_albums(
        &self,
        surface: &mut dyn AutomationSurface,
    ) -> Result<CrawlReport, CrawlError> {
        info!(target: "crawler", "=== 收集相册链接 ===");
        self.load_feed(surface)?;

        if self.max_pages > 0 {
            info!(target: "crawler", "展开 feed（最多 {} 次）", self.max_pages);
        } else {
            info!(target: "crawler", "展开 feed（不限次数，可能需要较长时间）");
        }

        let spinner = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut report = CrawlReport::default();
        let mut idle = 0u32;
        while idle < IDLE_LIMIT {
            if self.max_pages > 0 && report.iterations >= self.max_pages {
                report.limit_reached = true;
                break;
            }
            report.iterations += 1;

            let grew = self.load_more_grows(surface)
                || match self.scroll_grows(surface) {
                    Ok(grew) => grew,
                    Err(e) => {
                        debug!(target: "crawler", "滚动失败: {e}");
                        false
                    }
                };
            if grew {
                idle = 0;
            } else {
                idle += 1;
            }
            spinner.set_message(format!("展开 feed 第 {} 次", report.iterations));
            spinner.tick();
            self.pacer.pause(pacing::BETWEEN_FEED_PAGES);
        }
        spinner.finish_and_clear();

        if report.limit_reached {
            info!(target: "crawler", "展开 {} 次，已达上限", report.iterations);
        } else {
            info!(target: "crawler", "展开 {} 次，没有更多内容", report.iterations);
        }

        let hrefs = collect_hrefs(surface)?;
        report.anchors_examined = hrefs.len();
        info!(target: "crawler", "页面共 {} 个链接，开始过滤", hrefs.len());

        let mut seen = HashSet::new();
        for href in hrefs {
            if !filter::is_album_link(&href, &self.domain) {
                continue;
            }
            let album = AlbumReference::from_url(&href);
            if seen.insert(album.canonical_url.clone()) {
                report.albums.push(album);
            }
        }
        info!(target: "crawler", "找到 {} 个不重复的相册", report.albums.len());
        Ok(report)
    }

    fn load_feed(&self, surface: &mut dyn AutomationSurface) -> Result<(), CrawlError> {
        let url = self.feed_url.as_str();
        backoff::execute(&self.policy, self.pacer, "打开相册列表页", |_| {
            surface.navigate(url).map_err(AttemptError::retryable)?;
            self.pacer.pause(pacing::AFTER_PAGE_LOAD);
            let content = surface.page_content().map_err(AttemptError::retryable)?;
            if content.to_lowercase().contains("server error") {
                return Err(AttemptError::retryable(anyhow!("相册列表页返回 server error")));
            }
            Ok(())
        })
        .map_err(|source| CrawlError::FeedLoad {
            url: url.to_string(),
            source,
        })
    }

    /// 点击"加载更多"后页面变高才算展开成功；按钮还在但内容不变时算空转。
    fn load_more_grows(&self, surface: &mut dyn AutomationSurface) -> bool {
        let Some(button) = surface.first_visible(LOAD_MORE_SELECTOR) else {
            return false;
        };
        let before = match page_height(surface) {
            Ok(h) => h,
            Err(e) => {
                debug!(target: "crawler", "读取页面高度失败: {e}");
                return false;
            }
        };
        if let Err(e) = surface.click(&button) {
            debug!(target: "crawler", "点击加载更多失败: {e}");
            return false;
        }
        self.pacer.pause(pacing::AFTER_PAGE_LOAD);
        match page_height(surface) {
            Ok(after) if after > before => true,
            Ok(_) => {
                debug!(target: "crawler", "点击加载更多后页面没有变化");
                false
            }
            Err(e) => {
                debug!(target: "crawler", "读取页面高度失败: {e}");
                false
            }
        }
    }

    fn scroll_grows(&self, surface: &mut dyn AutomationSurface) -> Result<bool, SurfaceError> {
        let before = page_height(surface)?;
        surface.evaluate_script(scripts::SCROLL_TO_BOTTOM)?;
        self.pacer.pause(pacing::AFTER_CLICK);
        let after = page_height(surface)?;
        Ok(after > before)
    }
}

fn page_height(surface: &mut dyn AutomationSurface) -> Result<f64, SurfaceError> {
    let value = surface.evaluate_script(scripts::SCROLL_HEIGHT)?;
    Ok(value.as_f64().unwrap_or(0.0))
}

fn collect_hrefs(surface: &mut dyn AutomationSurface) -> Result<Vec<String>, CrawlError> {
    let value = surface
        .evaluate_script(scripts::COLLECT_HREFS)
        .map_err(CrawlError::Harvest)?;
    let Some(items) = value.as_array() else {
        return Err(CrawlError::UnexpectedScriptResult(value.to_string()));
    };
    let hrefs: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if hrefs.len() < items.len() {
        warn!(target: "crawler", "忽略 {} 个非字符串链接", items.len() - hrefs.len());
    }
    Ok(hrefs)
}
