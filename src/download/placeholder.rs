//! 占位图识别。
//!
//! 登录态失效时站点不会报错，而是悄悄返回同一张占位图。每代会话用一次
//! 不带凭据的请求抓取样本并记下 SHA-256，之后凡是内容哈希相同的响应都视为占位图。

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::automation::{AutomationSurface, SurfaceError};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unauthenticated fetch of {url} failed: {source}")]
    Surface {
        url: String,
        #[source]
        source: SurfaceError,
    },
    #[error("unauthenticated fetch of {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("unauthenticated fetch of {url} returned an empty body")]
    Empty { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// 十六进制 SHA-256
    pub digest: String,
    pub generation: u64,
    pub size: usize,
}

pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct PlaceholderOracle {
    fingerprint: Option<Fingerprint>,
}

impl PlaceholderOracle {
    /// 不带会话凭据请求 `sample_url`，记录其内容哈希作为第 `generation` 代的指纹。
    pub fn capture(
        &mut self,
        surface: &mut dyn AutomationSurface,
        sample_url: &str,
        generation: u64,
    ) -> Result<&Fingerprint, CaptureError> {
        debug!(target: "download", "抓取占位图样本: {sample_url}");
        let response =
            surface
                .fetch_unauthenticated(sample_url)
                .map_err(|source| CaptureError::Surface {
                    url: sample_url.to_string(),
                    source,
                })?;
        if !response.is_ok() {
            return Err(CaptureError::Status {
                url: sample_url.to_string(),
                status: response.status,
            });
        }
        if response.body.is_empty() {
            return Err(CaptureError::Empty {
                url: sample_url.to_string(),
            });
        }

        let fingerprint = Fingerprint {
            digest: content_digest(&response.body),
            generation,
            size: response.body.len(),
        };
        info!(
            target: "download",
            "占位图指纹（第 {} 代）: {}… ({} 字节)",
            generation,
            &fingerprint.digest[..16],
            fingerprint.size
        );
        Ok(&*self.fingerprint.insert(fingerprint))
    }

    /// 尚未抓取指纹时一律返回 false。
    pub fn is_placeholder(&self, bytes: &[u8]) -> bool {
        match &self.fingerprint {
            Some(fp) => content_digest(bytes) == fp.digest,
            None => false,
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn invalidate(&mut self) {
        if let Some(fp) = self.fingerprint.take() {
            debug!(target: "download", "作废第 {} 代占位图指纹", fp.generation);
        }
    }
}
