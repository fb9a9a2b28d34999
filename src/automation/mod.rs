//! 自动化界面（Automation Surface）抽象。
//!
//! 核心组件只依赖 [`AutomationSurface`]：会话控制器独占实现者，其它组件
//! 在单次调用期间借用 `&mut dyn AutomationSurface`，不得跨越重建保存引用。

use std::time::Duration;

use thiserror::Error;

pub mod http_surface;
#[cfg(test)]
pub(crate) mod mock;
pub mod scripts;

pub use http_surface::{HttpSurface, SurfaceOptions};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("element {0:?} is no longer attached to the page")]
    Detached(ElementHandle),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid url `{url}`: {reason}")]
    Url { url: String, reason: String },
}

/// 页面元素句柄：某个选择器在当前页面中的第 `index` 个匹配项。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

pub trait AutomationSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    fn current_url(&self) -> String;

    fn page_content(&self) -> Result<String, SurfaceError>;

    /// 执行脚本；可用脚本见 [`scripts`]。
    fn evaluate_script(&mut self, script: &str) -> Result<serde_json::Value, SurfaceError>;

    fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SurfaceError>;

    fn is_visible(&mut self, element: &ElementHandle) -> Result<bool, SurfaceError>;

    fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SurfaceError>;

    fn click(&mut self, element: &ElementHandle) -> Result<(), SurfaceError>;

    /// 清空输入框后写入 `text`。
    fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SurfaceError>;

    /// 在元素上按键，例如 `Enter`、`Tab`、`Escape`。
    fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SurfaceError>;

    /// 等待选择器出现，超时返回 `Ok(false)`。
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, SurfaceError>;

    /// 带当前会话凭据的 HTTP 请求（不触发页面跳转）。
    fn fetch_authenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError>;

    /// 不带任何会话凭据的 HTTP 请求。
    fn fetch_unauthenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError>;

    /// 销毁并重建底层实例，之前的登录态与页面全部丢弃。
    fn recreate(&mut self) -> Result<(), SurfaceError>;

    /// 第一个可见的匹配元素。查询出错视为不存在。
    fn first_visible(&mut self, selector: &str) -> Option<ElementHandle> {
        let handles = self.query_all(selector).ok()?;
        handles
            .into_iter()
            .find(|h| self.is_visible(h).unwrap_or(false))
    }
}
