//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `harvester.yml` 的字段元信息。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 站点配置
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_feed_path")]
    pub feed_path: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    // 浏览器配置
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub humanize: bool,

    // 网络配置
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: u64,
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: u64,

    // 抓取配置
    #[serde(default)]
    pub max_album_pages: usize,
    #[serde(default = "default_browser_restart_interval")]
    pub browser_restart_interval: usize,

    // 账号配置
    #[serde(default)]
    pub credentials: Credentials,
}

/// 登录凭据。只读借给会话控制器使用，不写日志。
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            feed_path: default_feed_path(),
            download_dir: default_download_dir(),
            headless: default_true(),
            user_agent: default_user_agent(),
            humanize: default_true(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            download_timeout: default_download_timeout(),
            page_load_timeout: default_page_load_timeout(),
            max_album_pages: 0,
            browser_restart_interval: default_browser_restart_interval(),
            credentials: Credentials::default(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "harvester.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 13] = [
            FieldMeta {
                name: "base_url",
                description: "站点根地址",
            },
            FieldMeta {
                name: "feed_path",
                description: "相册列表（feed）页面路径",
            },
            FieldMeta {
                name: "download_dir",
                description: "下载根目录, 按 <作者>/<相册>/<文件名> 存放",
            },
            FieldMeta {
                name: "headless",
                description: "是否以无头模式运行浏览器",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "humanize",
                description: "是否在操作之间插入随机停顿（关闭后仅保留重试退避）",
            },
            FieldMeta {
                name: "max_retries",
                description: "最大重试次数",
            },
            FieldMeta {
                name: "retry_base_delay",
                description: "重试退避基准时间（秒）, 第 n 次重试前等待 base * 2^n + 抖动",
            },
            FieldMeta {
                name: "download_timeout",
                description: "图片下载超时时间, 单位ms",
            },
            FieldMeta {
                name: "page_load_timeout",
                description: "页面加载超时时间, 单位ms",
            },
            FieldMeta {
                name: "max_album_pages",
                description: "相册列表最多展开次数（0 表示不限制）",
            },
            FieldMeta {
                name: "browser_restart_interval",
                description: "每处理 N 个相册重启一次浏览器以释放内存（0 表示不重启）",
            },
            FieldMeta {
                name: "credentials",
                description: "登录账号（username / password）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Validation(format!("base_url 无效: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ConfigError::Validation(format!(
                "base_url 必须是 http(s) 地址: {}",
                self.base_url
            )));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "max_retries 至少为 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn download_root(&self) -> PathBuf {
        let dir = self.download_dir.trim();
        if dir.is_empty() {
            return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        }
        let path = PathBuf::from(dir);
        if path.is_absolute() {
            return path;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }

    pub fn feed_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.feed_path.trim_start_matches('/')
        )
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout.max(100))
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout.max(100))
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://www.suicidegirls.com".to_string()
}

fn default_feed_path() -> String {
    "/photos/sg/recent/all/".to_string()
}

fn default_download_dir() -> String {
    "suicidegirls".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_download_timeout() -> u64 {
    30_000
}

fn default_page_load_timeout() -> u64 {
    60_000
}

fn default_browser_restart_interval() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_joins_without_double_slash() {
        let cfg = Config {
            base_url: "https://example.com/".to_string(),
            feed_path: "/photos/recent/".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.feed_url(), "https://example.com/photos/recent/");
    }

    #[test]
    fn validate_rejects_non_http_base_url() {
        let cfg = Config {
            base_url: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("jane", "hunter2");
        let text = format!("{creds:?}");
        assert!(text.contains("jane"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn field_list_covers_every_serialized_key() {
        let value = serde_yaml::to_value(Config::default()).unwrap();
        let serde_yaml::Value::Mapping(map) = value else {
            panic!("config must serialize to a mapping");
        };
        assert_eq!(map.len(), Config::fields().len());
        for field in Config::fields() {
            assert!(map.contains_key(serde_yaml::Value::String(field.name.to_string())));
        }
    }
}
