//! 单个相册的处理：打开相册页、提取图片链接、逐张下载。
//!
//! 同一相册内连续两次拿到占位图即停止，剩余图片不再请求。

use std::collections::HashSet;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::engine::DownloadEngine;
use super::models::{AlbumReport, DownloadOutcome, MediaItem};
use crate::automation::AutomationSurface;
use crate::base_system::album_paths::AlbumReference;
use crate::base_system::backoff::{self, AttemptError, Exhausted};
use crate::base_system::pacing;

pub const PHOTO_SELECTORS: [&str; 2] = [
    "li.photo-container a[href*='cloudfront']",
    "li.photo-container a[href*='amazonaws']",
];

const ANY_LINK: &str = "a[href]";
const CDN_MARKERS: [&str; 2] = ["cloudfront", "amazonaws"];
const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// 连续多少次占位图后放弃当前相册。
pub const AUTH_FAILURE_CUTOFF: usize = 2;

#[derive(Debug, Error)]
pub enum AlbumError {
    #[error("album page {url} redirected to the login wall")]
    AuthRedirect { url: String },
    #[error("failed to load album page {url}: {source}")]
    Load {
        url: String,
        #[source]
        source: Exhausted,
    },
}

impl AlbumError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthRedirect { .. })
    }
}

impl DownloadEngine<'_> {
    pub fn process_album(
        &self,
        surface: &mut dyn AutomationSurface,
        album: &AlbumReference,
    ) -> Result<AlbumReport, AlbumError> {
        info!(target: "download", "处理相册 {} ({})", album.label(), album.canonical_url);
        self.load_album_page(surface, &album.canonical_url)?;

        let mut report = AlbumReport::new(album.clone());
        let urls = extract_image_urls(surface);
        report.images_found = urls.len();
        if urls.is_empty() {
            warn!(target: "download", "相册 {} 没有找到图片", album.label());
            return Ok(report);
        }
        info!(target: "download", "相册 {} 共 {} 张图片", album.label(), urls.len());

        let mut consecutive_auth = 0usize;
        for (index, url) in urls.iter().enumerate() {
            let item = MediaItem::new(album, self.root, url, index + 1);
            let outcome = self.fetch(surface, &item);
            report.counts.record(outcome);

            if outcome == DownloadOutcome::AuthFailure {
                consecutive_auth += 1;
                if consecutive_auth >= AUTH_FAILURE_CUTOFF {
                    warn!(
                        target: "download",
                        "相册 {} 连续 {} 次收到占位图，放弃剩余 {} 张",
                        album.label(),
                        consecutive_auth,
                        urls.len() - index - 1
                    );
                    report.auth_failed = true;
                    break;
                }
            } else {
                consecutive_auth = 0;
            }

            if outcome.touched_network() {
                self.pacer.pause(pacing::BETWEEN_DOWNLOADS);
            }
        }

        info!(target: "download", "相册 {} 完成: {}", album.label(), report.counts);
        Ok(report)
    }

    pub(crate) fn load_album_page(
        &self,
        surface: &mut dyn AutomationSurface,
        url: &str,
    ) -> Result<(), AlbumError> {
        let description = format!("打开相册 {url}");
        let loaded = backoff::execute(&self.policy, self.pacer, &description, |_| {
            surface.navigate(url).map_err(AttemptError::retryable)?;
            let landed = surface.current_url().to_lowercase();
            if landed.contains("login") || landed.contains("join") {
                return Err(AttemptError::fatal(anyhow!("被重定向到 {landed}")));
            }
            Ok(())
        });

        match loaded {
            Ok(()) => {
                self.pacer.pause(pacing::AFTER_PAGE_LOAD);
                Ok(())
            }
            Err(e) if e.fatal => Err(AlbumError::AuthRedirect {
                url: url.to_string(),
            }),
            Err(e) => Err(AlbumError::Load {
                url: url.to_string(),
                source: e,
            }),
        }
    }
}

/// 取出相册页上的图片链接（保留查询参数，可能带签名），按出现顺序去重。
pub fn extract_image_urls(surface: &mut dyn AutomationSurface) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for selector in PHOTO_SELECTORS {
        for href in hrefs(surface, selector) {
            if seen.insert(href.clone()) {
                urls.push(href);
            }
        }
    }
    if !urls.is_empty() {
        return urls;
    }

    debug!(target: "download", "相册容器中没有图片链接，回退到全页 CDN 链接");
    for href in hrefs(surface, ANY_LINK) {
        if looks_like_cdn_image(&href) && seen.insert(href.clone()) {
            urls.push(href);
        }
    }
    urls
}

fn hrefs(surface: &mut dyn AutomationSurface, selector: &str) -> Vec<String> {
    let handles = match surface.query_all(selector) {
        Ok(h) => h,
        Err(e) => {
            debug!(target: "download", "查询 {selector} 失败: {e}");
            return Vec::new();
        }
    };
    handles
        .iter()
        .filter_map(|h| surface.attribute(h, "href").ok().flatten())
        .filter(|href| !href.trim().is_empty())
        .collect()
}

fn looks_like_cdn_image(href: &str) -> bool {
    let lower = href.to_lowercase();
    if !CDN_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    let path = lower.split(['?', '#']).next().unwrap_or("");
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::mock::{MockState, MockSurface};
    use crate::base_system::backoff::RetryPolicy;
    use crate::base_system::pacing::NoPacing;
    use crate::download::PlaceholderOracle;
    use std::time::Duration;
    use tempfile::TempDir;

    fn album0(state: &MockState) -> AlbumReference {
        AlbumReference::from_url(&state.album_order[0])
    }

    #[test]
    fn cdn_fallback_filter() {
        assert!(looks_like_cdn_image("https://d1.cloudfront.net/a/b.JPG?x=1"));
        assert!(looks_like_cdn_image("https://s3.amazonaws.com/b/c.webp"));
        assert!(!looks_like_cdn_image("https://d1.cloudfront.net/a/page.html"));
        assert!(!looks_like_cdn_image("https://other.example/b.jpg"));
    }

    #[test]
    fn downloads_every_image_of_an_album() {
        let dir = TempDir::new().unwrap();
        let mut state = MockState::site(1, 4);
        state.logged_in = true;
        let album = album0(&state);
        let (mut surface, _shared) = MockSurface::new(state);
        let oracle = PlaceholderOracle::default();
        let engine = DownloadEngine::new(
            RetryPolicy::new(3, Duration::ZERO),
            &NoPacing,
            &oracle,
            dir.path(),
        );

        let report = engine.process_album(&mut surface, &album).unwrap();
        assert_eq!(report.images_found, 4);
        assert_eq!(report.counts.downloaded, 4);
        assert!(!report.auth_failed);
        let saved = dir.path().join("owner0").join("set0");
        assert_eq!(std::fs::read_dir(saved).unwrap().count(), 4);
    }

    #[test]
    fn two_placeholders_stop_the_album() {
        let dir = TempDir::new().unwrap();
        let mut state = MockState::site(1, 6);
        state.logged_in = true;
        state.expire_after_fetches = Some(1);
        let album = album0(&state);
        let (mut surface, shared) = MockSurface::new(state);
        let mut oracle = PlaceholderOracle::default();
        oracle
            .capture(&mut surface, "https://d1.cloudfront.net/sample.jpg", 1)
            .unwrap();
        let engine = DownloadEngine::new(
            RetryPolicy::new(3, Duration::ZERO),
            &NoPacing,
            &oracle,
            dir.path(),
        );

        let report = engine.process_album(&mut surface, &album).unwrap();
        assert!(report.auth_failed);
        assert_eq!(report.counts.downloaded, 1);
        assert_eq!(report.counts.auth_failures, 2);
        // 第一张成功，随后两张占位图，剩余三张不再请求
        assert_eq!(shared.borrow().authenticated_fetches.len(), 3);
    }

    #[test]
    fn redirect_to_join_is_auth_failure_without_retry() {
        let dir = TempDir::new().unwrap();
        let state = MockState::site(1, 2);
        let album = album0(&state);
        let (mut surface, shared) = MockSurface::new(state);
        let oracle = PlaceholderOracle::default();
        let engine = DownloadEngine::new(
            RetryPolicy::new(3, Duration::ZERO),
            &NoPacing,
            &oracle,
            dir.path(),
        );

        let err = engine.process_album(&mut surface, &album).unwrap_err();
        assert!(err.is_auth_failure());
        let visits = shared
            .borrow()
            .events
            .iter()
            .filter(|e| e.starts_with("album:"))
            .count();
        assert_eq!(visits, 1);
    }

    #[test]
    fn persistent_navigation_errors_are_load_failures() {
        let dir = TempDir::new().unwrap();
        let mut state = MockState::site(1, 2);
        state.logged_in = true;
        state.navigation_failures = 10;
        let album = album0(&state);
        let (mut surface, _shared) = MockSurface::new(state);
        let oracle = PlaceholderOracle::default();
        let engine = DownloadEngine::new(
            RetryPolicy::new(2, Duration::ZERO),
            &NoPacing,
            &oracle,
            dir.path(),
        );

        let err = engine.process_album(&mut surface, &album).unwrap_err();
        assert!(matches!(err, AlbumError::Load { .. }));
    }
}
