//! 相册链接过滤。

use url::Url;

const SHARING_PATTERNS: [&str; 11] = [
    "twitter.com",
    "mailto:",
    "facebook.com",
    "pinterest.com",
    "reddit.com",
    "tumblr.com",
    "instagram.com",
    "/share?",
    "?&body=",
    "share=",
    "intent/tweet",
];

/// 站点主域名：去掉 `www.` 前缀后的主机名，小写。
pub fn site_domain(base_url: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// 路径同时含作者段和相册段、不是分享链接、且属于 `domain`（含子域名）。
pub fn is_album_link(href: &str, domain: &str) -> bool {
    let href = href.trim();
    if href.is_empty() || !href.contains("/girls/") || !href.contains("/album/") {
        return false;
    }
    let lower = href.to_ascii_lowercase();
    if SHARING_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    match Url::parse(href) {
        Ok(u) => match u.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{domain}"))
            }
            None => false,
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_strips_www() {
        assert_eq!(
            site_domain("https://www.suicidegirls.com").as_deref(),
            Some("suicidegirls.com")
        );
        assert_eq!(site_domain("https://site.example/").as_deref(), Some("site.example"));
        assert_eq!(site_domain("not a url"), None);
    }

    #[test]
    fn accepts_album_links_on_site() {
        let d = "suicidegirls.com";
        assert!(is_album_link("https://www.suicidegirls.com/girls/jane/album/1/x/", d));
        assert!(is_album_link("http://suicidegirls.com/girls/jane/album/1/x/", d));
    }

    #[test]
    fn rejects_other_links() {
        let d = "suicidegirls.com";
        assert!(!is_album_link("https://www.suicidegirls.com/girls/jane/", d));
        assert!(!is_album_link("https://www.suicidegirls.com/album/1/x/", d));
        assert!(!is_album_link(
            "https://twitter.com/intent/tweet?url=https://www.suicidegirls.com/girls/jane/album/1/x/",
            d
        ));
        assert!(!is_album_link(
            "https://www.suicidegirls.com/girls/jane/album/1/x/?share=fb",
            d
        ));
        assert!(!is_album_link("mailto:?&body=/girls/jane/album/1/x/", d));
        assert!(!is_album_link("https://mirror.example/girls/jane/album/1/x/", d));
        assert!(!is_album_link("https://notsuicidegirls.com/girls/jane/album/1/x/", d));
    }
}
