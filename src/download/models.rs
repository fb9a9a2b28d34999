//! 下载相关的数据模型：媒体条目、单条下载结果与相册汇总。

use std::fmt;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use crate::base_system::album_paths::{AlbumReference, media_file_name};

/// 一张待下载的图片。本地路径只由 (作者, 相册, 文件名) 决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub source_url: String,
    pub local_path: PathBuf,
}

impl MediaItem {
    /// `ordinal` 从 1 开始，只在 URL 中取不到文件名时使用。
    pub fn new(album: &AlbumReference, root: &Path, source_url: &str, ordinal: usize) -> Self {
        Self {
            source_url: source_url.to_string(),
            local_path: album
                .local_dir(root)
                .join(media_file_name(source_url, ordinal)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success,
    SkippedValid,
    SkippedCorruptReplaced,
    AuthFailure,
    Failure,
}

impl DownloadOutcome {
    /// 是否发生了网络下载（用于决定下载后的停顿）。
    pub fn touched_network(self) -> bool {
        !matches!(self, Self::SkippedValid)
    }
}

/// 各类结果的计数，可跨相册累加。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub downloaded: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub auth_failures: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Success => self.downloaded += 1,
            DownloadOutcome::SkippedCorruptReplaced => self.replaced += 1,
            DownloadOutcome::SkippedValid => self.skipped += 1,
            DownloadOutcome::AuthFailure => self.auth_failures += 1,
            DownloadOutcome::Failure => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.replaced + self.skipped + self.auth_failures + self.failed
    }
}

impl AddAssign for OutcomeCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.downloaded += rhs.downloaded;
        self.replaced += rhs.replaced;
        self.skipped += rhs.skipped;
        self.auth_failures += rhs.auth_failures;
        self.failed += rhs.failed;
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "新下载 {}，替换损坏 {}，已存在 {}，登录失效 {}，失败 {}",
            self.downloaded, self.replaced, self.skipped, self.auth_failures, self.failed
        )
    }
}

#[derive(Debug, Clone)]
pub struct AlbumReport {
    pub album: AlbumReference,
    pub images_found: usize,
    pub counts: OutcomeCounts,
    /// 连续两次占位图后提前结束，会话大概率已失效。
    pub auth_failed: bool,
}

impl AlbumReport {
    pub fn new(album: AlbumReference) -> Self {
        Self {
            album,
            images_found: 0,
            counts: OutcomeCounts::default(),
            auth_failed: false,
        }
    }
}
