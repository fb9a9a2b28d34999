//! 单张图片的下载：校验已有文件、带凭据抓取、识别占位图、原子写盘。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::models::{DownloadOutcome, MediaItem};
use super::placeholder::PlaceholderOracle;
use super::validator;
use crate::automation::AutomationSurface;
use crate::base_system::backoff::{self, AttemptError, RetryPolicy};
use crate::base_system::pacing::Pacer;

enum Fetched {
    Placeholder,
    Body(Vec<u8>),
}

/// 下载引擎只借用会话期间的资源，不跨越回收保存任何引用。
pub struct DownloadEngine<'a> {
    pub(crate) policy: RetryPolicy,
    pub(crate) pacer: &'a dyn Pacer,
    pub(crate) oracle: &'a PlaceholderOracle,
    pub(crate) root: &'a Path,
}

impl<'a> DownloadEngine<'a> {
    pub fn new(
        policy: RetryPolicy,
        pacer: &'a dyn Pacer,
        oracle: &'a PlaceholderOracle,
        root: &'a Path,
    ) -> Self {
        Self {
            policy,
            pacer,
            oracle,
            root,
        }
    }

    pub fn fetch(&self, surface: &mut dyn AutomationSurface, item: &MediaItem) -> DownloadOutcome {
        let path = &item.local_path;
        if validator::is_valid(path, self.oracle) {
            debug!(target: "download", "已存在且有效，跳过: {}", path.display());
            return DownloadOutcome::SkippedValid;
        }

        let replacing = path.exists();
        if replacing {
            warn!(target: "download", "已有文件无效，删除后重新下载: {}", path.display());
            if let Err(e) = fs::remove_file(path) {
                warn!(target: "download", "删除 {} 失败: {e}", path.display());
            }
        }

        let description = format!("下载 {}", file_label(path));
        let fetched = backoff::execute(&self.policy, self.pacer, &description, |_| {
            self.attempt(surface, &item.source_url)
        });

        match fetched {
            Ok(Fetched::Placeholder) => {
                warn!(target: "download", "收到占位图，登录可能已失效: {}", item.source_url);
                DownloadOutcome::AuthFailure
            }
            Ok(Fetched::Body(body)) => match write_atomic(path, &body) {
                Ok(()) => {
                    info!(
                        target: "download",
                        "已保存 {} ({} KB)",
                        file_label(path),
                        body.len() / 1024
                    );
                    if replacing {
                        DownloadOutcome::SkippedCorruptReplaced
                    } else {
                        DownloadOutcome::Success
                    }
                }
                Err(e) => {
                    warn!(target: "download", "写入 {} 失败: {e:#}", path.display());
                    DownloadOutcome::Failure
                }
            },
            Err(exhausted) => {
                warn!(target: "download", "放弃 {}: {exhausted}", item.source_url);
                DownloadOutcome::Failure
            }
        }
    }

    fn attempt(
        &self,
        surface: &mut dyn AutomationSurface,
        url: &str,
    ) -> Result<Fetched, AttemptError> {
        let response = surface
            .fetch_authenticated(url)
            .map_err(AttemptError::retryable)?;
        if !response.is_ok() {
            return Err(AttemptError::retryable(anyhow!(
                "HTTP {} for {url}",
                response.status
            )));
        }
        if self.oracle.is_placeholder(&response.body) {
            return Ok(Fetched::Placeholder);
        }
        // 写盘的内容必须能通过已有文件校验
        if (response.body.len() as u64) < validator::MIN_FILE_BYTES {
            return Err(AttemptError::retryable(anyhow!(
                "响应过小（{} 字节）",
                response.body.len()
            )));
        }
        if !validator::has_image_signature(&response.body) {
            return Err(AttemptError::retryable(anyhow!("响应不是图片: {url}")));
        }
        Ok(Fetched::Body(response.body))
    }
}

/// 先写同目录临时文件再改名，中途失败不会留下半个文件。
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).with_context(|| format!("create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(bytes).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist {}: {}", path.display(), e.error))?;
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
