//! 本地文件校验：判断已存在的文件能否跳过下载。

use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use super::placeholder::PlaceholderOracle;

/// 正常图片都有几十 KB，错误页和截断文件远小于此。
pub const MIN_FILE_BYTES: u64 = 10_000;

const HEADER_LEN: usize = 12;

/// 已知图片格式的文件头。
pub fn has_image_signature(header: &[u8]) -> bool {
    header.starts_with(&[0xFF, 0xD8, 0xFF])
        || header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
        || header.starts_with(b"GIF87a")
        || header.starts_with(b"GIF89a")
        || (header.len() >= 12 && header.starts_with(b"RIFF") && &header[8..12] == b"WEBP")
        || header.starts_with(b"BM")
}

/// 文件存在、大小超过下限、文件头是图片且不是占位图时才算有效。
/// 读取出错一律视为无效。
pub fn is_valid(path: &Path, oracle: &PlaceholderOracle) -> bool {
    match check(path, oracle) {
        Ok(valid) => valid,
        Err(e) => {
            debug!(target: "download", "校验 {} 失败: {e}", path.display());
            false
        }
    }
}

fn check(path: &Path, oracle: &PlaceholderOracle) -> std::io::Result<bool> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Ok(false);
    }
    if meta.len() < MIN_FILE_BYTES {
        debug!(target: "download", "{} 过小（{} 字节）", path.display(), meta.len());
        return Ok(false);
    }

    let mut header = [0u8; HEADER_LEN];
    let mut file = fs::File::open(path)?;
    let n = read_up_to(&mut file, &mut header)?;
    if !has_image_signature(&header[..n]) {
        debug!(target: "download", "{} 文件头不是图片", path.display());
        return Ok(false);
    }

    if oracle.fingerprint().is_some() {
        let body = fs::read(path)?;
        if oracle.is_placeholder(&body) {
            debug!(target: "download", "{} 是占位图", path.display());
            return Ok(false);
        }
    }
    Ok(true)
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
