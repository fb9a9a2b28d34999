//! 相册链接解析、规范化与本地路径推导。
//!
//! 站点路径固定为 `/girls/<owner>/album/<id>/<name>/`；本地布局为
//! `<root>/<owner>/<album>/<文件名>`，同一 URL 永远得到同一路径。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

pub const UNKNOWN: &str = "unknown";

static RE_ILLEGAL: OnceLock<Regex> = OnceLock::new();

fn re_illegal() -> &'static Regex {
    RE_ILLEGAL.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("compile RE_ILLEGAL"))
}

/// 把路径段中不合法的字符替换为 `_`。
pub fn sanitize_segment(name: &str) -> String {
    let cleaned = re_illegal().replace_all(name.trim(), "_").to_string();
    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// http → https；其余部分原样保留。
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumReference {
    pub owner: String,
    pub album: String,
    pub canonical_url: String,
}

impl AlbumReference {
    pub fn from_url(raw: &str) -> Self {
        let canonical_url = canonicalize_url(raw);
        let (owner, album) = parse_owner_album(&canonical_url);
        Self {
            owner,
            album,
            canonical_url,
        }
    }

    /// 相册目录：`<root>/<owner>/<album>`。
    pub fn local_dir(&self, root: &Path) -> PathBuf {
        root.join(sanitize_segment(&self.owner))
            .join(sanitize_segment(&self.album))
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.owner, self.album)
    }
}

/// 解析出 (owner, album)。无法识别时返回 `("unknown", "unknown")`。
pub fn parse_owner_album(raw: &str) -> (String, String) {
    if let Ok(parsed) = Url::parse(raw) {
        let parts: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() >= 5 && parts[0] == "girls" && parts[2] == "album" {
            return (parts[1].to_string(), parts[4].to_string());
        }
    }

    // 兜底：URL 结构不完整时按片段切分
    if let (Some(girls_at), Some(album_at)) = (raw.find("/girls/"), raw.find("/album/")) {
        let owner = raw[girls_at + "/girls/".len()..]
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN);
        let album = raw[album_at + "/album/".len()..]
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN);
        return (owner.to_string(), album.to_string());
    }

    (UNKNOWN.to_string(), UNKNOWN.to_string())
}

/// 从图片 URL 推导文件名：取最后一段、去掉查询参数并清理非法字符；
/// 为空时使用 `image_<ordinal>.jpg`。
pub fn media_file_name(source_url: &str, ordinal: usize) -> String {
    let without_query = source_url.split(['?', '#']).next().unwrap_or("");
    let last = without_query.rsplit('/').next().unwrap_or("");
    if last.is_empty() {
        return format!("image_{ordinal}.jpg");
    }
    sanitize_segment(last)
}
