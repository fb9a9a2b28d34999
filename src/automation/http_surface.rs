//! 基于 HTTP + 静态 HTML 解析的自动化界面实现。
//!
//! 没有脚本引擎，只模拟核心组件需要的行为：
//! - 一次 `navigate` 开启一条“页面链”，元素操作作用于链上最后加载的页面；
//! - 点击同一路径（仅查询参数不同）的链接视为“加载更多”，把目标页追加到链上；
//! - 在表单输入框上按 Enter 提交所在表单；
//! - 只识别 [`scripts`](super::scripts) 中的预定义脚本。

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{AutomationSurface, ElementHandle, FetchResponse, SurfaceError, scripts};
use crate::base_system::context::Config;

const BLANK: &str = "about:blank";

#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    pub user_agent: String,
    pub page_load_timeout: Duration,
    pub download_timeout: Duration,
    pub headless: bool,
}

impl SurfaceOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            page_load_timeout: cfg.page_load_timeout(),
            download_timeout: cfg.download_timeout(),
            headless: cfg.headless,
        }
    }
}

pub struct HttpSurface {
    options: SurfaceOptions,
    client: Client,
    anonymous: Client,
    current_url: String,
    pages: Vec<String>,
    /// 当前页面链上已经追加过的地址
    expanded: HashSet<String>,
    form_values: HashMap<String, String>,
}

impl HttpSurface {
    pub fn new(options: SurfaceOptions) -> Result<Self, SurfaceError> {
        if !options.headless {
            debug!(target: "surface", "HTTP 后端没有可见窗口，忽略 headless=false");
        }
        let client = build_client(&options, true)?;
        let anonymous = build_client(&options, false)?;
        Ok(Self {
            options,
            client,
            anonymous,
            current_url: BLANK.to_string(),
            pages: Vec::new(),
            expanded: HashSet::new(),
            form_values: HashMap::new(),
        })
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.current_url).ok()?;
        base.join(href.trim()).ok().map(|u| u.to_string())
    }

    fn load(&self, request: reqwest::blocking::RequestBuilder, url: &str) -> Result<(String, String), SurfaceError> {
        let resp = request
            .timeout(self.options.page_load_timeout)
            .send()
            .map_err(|e| SurfaceError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let final_url = resp.url().to_string();
        // 和浏览器一样，错误状态码的页面照常显示，由调用方判断内容
        let html = resp.text().map_err(|e| SurfaceError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok((final_url, html))
    }

    fn start_chain(&mut self, final_url: String, html: String) {
        self.current_url = final_url;
        self.pages.clear();
        self.pages.push(html);
        self.expanded.clear();
        self.form_values.clear();
    }

    fn last_page(&self) -> Html {
        Html::parse_document(self.pages.last().map(String::as_str).unwrap_or(""))
    }

    fn with_element<T>(
        &self,
        element: &ElementHandle,
        f: impl FnOnce(ElementRef<'_>) -> T,
    ) -> Result<T, SurfaceError> {
        let selector = parse_selector(&element.selector)?;
        let doc = self.last_page();
        let found = doc.select(&selector).nth(element.index);
        match found {
            Some(el) => Ok(f(el)),
            None => Err(SurfaceError::Detached(element.clone())),
        }
    }

    fn is_same_path(&self, target: &str) -> bool {
        let (Ok(cur), Ok(next)) = (Url::parse(&self.current_url), Url::parse(target)) else {
            return false;
        };
        cur.scheme() == next.scheme()
            && cur.host_str() == next.host_str()
            && cur.path() == next.path()
            && cur.query() != next.query()
    }

    fn append_page(&mut self, target: &str) -> Result<(), SurfaceError> {
        if self.expanded.contains(target) {
            debug!(target: "surface", "{} 已经加载过，不再追加", target);
            return Ok(());
        }
        let request = self.client.get(target);
        let (_, html) = self.load(request, target)?;
        debug!(target: "surface", "追加页面 {} (共 {} 页)", target, self.pages.len() + 1);
        self.pages.push(html);
        self.expanded.insert(target.to_string());
        Ok(())
    }

    fn submit_form(&mut self, element: &ElementHandle) -> Result<(), SurfaceError> {
        let filled = self.form_values.clone();
        let current = self.current_url.clone();
        let submission = self.with_element(element, |el| {
            let form = el
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "form")?;
            let method = form
                .value()
                .attr("method")
                .unwrap_or("get")
                .to_ascii_lowercase();
            let action = form.value().attr("action").unwrap_or("").to_string();
            let inputs = Selector::parse("input[name]").ok()?;
            let fields: Vec<(String, String)> = form
                .select(&inputs)
                .filter(|input| {
                    !matches!(
                        input.value().attr("type").map(str::to_ascii_lowercase).as_deref(),
                        Some("submit" | "button" | "image" | "reset")
                    )
                })
                .filter_map(|input| {
                    let name = input.value().attr("name")?.to_string();
                    let value = filled
                        .get(&name)
                        .cloned()
                        .or_else(|| input.value().attr("value").map(str::to_string))
                        .unwrap_or_default();
                    Some((name, value))
                })
                .collect();
            Some((method, action, fields))
        })?;

        let Some((method, action, fields)) = submission else {
            return Err(SurfaceError::Unsupported(format!(
                "{:?} is not inside a form",
                element
            )));
        };
        let target = if action.trim().is_empty() {
            current
        } else {
            self.resolve(&action).ok_or_else(|| SurfaceError::Url {
                url: action.clone(),
                reason: "cannot resolve form action".to_string(),
            })?
        };

        debug!(target: "surface", "提交表单 {} {}", method, target);
        let request = if method == "post" {
            self.client.post(&target).form(&fields)
        } else {
            self.client.get(&target).query(&fields)
        };
        let (final_url, html) = self.load(request, &target)?;
        self.start_chain(final_url, html);
        Ok(())
    }

    fn collect_hrefs(&self) -> Value {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Value::Array(Vec::new());
        };
        let mut out = Vec::new();
        for page in &self.pages {
            let doc = Html::parse_document(page);
            for a in doc.select(&selector) {
                if let Some(href) = a.value().attr("href")
                    && let Some(abs) = self.resolve(href)
                {
                    out.push(Value::String(abs));
                }
            }
        }
        Value::Array(out)
    }

    fn fetch_with(&self, client: &Client, url: &str) -> Result<FetchResponse, SurfaceError> {
        let resp = client
            .get(url)
            .timeout(self.options.download_timeout)
            .send()?;
        let status = resp.status().as_u16();
        let body = resp.bytes()?.to_vec();
        Ok(FetchResponse { status, body })
    }
}

impl AutomationSurface for HttpSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        let request = self.client.get(url);
        let (final_url, html) = self.load(request, url)?;
        self.start_chain(final_url, html);
        Ok(())
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    fn page_content(&self) -> Result<String, SurfaceError> {
        Ok(self.pages.join("\n"))
    }

    fn evaluate_script(&mut self, script: &str) -> Result<Value, SurfaceError> {
        match script {
            scripts::COLLECT_HREFS => Ok(self.collect_hrefs()),
            scripts::SCROLL_HEIGHT => {
                let height: usize = self.pages.iter().map(String::len).sum();
                Ok(Value::from(height))
            }
            // 静态页面没有懒加载，滚动不会带来新内容
            scripts::SCROLL_TO_BOTTOM => Ok(Value::Null),
            other => Err(SurfaceError::Unsupported(format!("script `{other}`"))),
        }
    }

    fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SurfaceError> {
        let parsed = parse_selector(selector)?;
        let count = self.last_page().select(&parsed).count();
        Ok((0..count).map(|i| ElementHandle::new(selector, i)).collect())
    }

    fn is_visible(&mut self, element: &ElementHandle) -> Result<bool, SurfaceError> {
        match self.with_element(element, |el| {
            let v = el.value();
            let style = v
                .attr("style")
                .unwrap_or("")
                .replace(' ', "")
                .to_ascii_lowercase();
            v.attr("hidden").is_none()
                && v.attr("disabled").is_none()
                && !v.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
                && !style.contains("display:none")
                && !style.contains("visibility:hidden")
        }) {
            Ok(visible) => Ok(visible),
            Err(SurfaceError::Detached(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SurfaceError> {
        self.with_element(element, |el| el.value().attr(name).map(str::to_string))
    }

    fn click(&mut self, element: &ElementHandle) -> Result<(), SurfaceError> {
        let (tag, href, kind) = self.with_element(element, |el| {
            let v = el.value();
            (
                v.name().to_string(),
                v.attr("href").map(str::to_string),
                v.attr("type").map(str::to_ascii_lowercase),
            )
        })?;

        if let Some(href) = href.filter(|h| !h.trim().is_empty() && !h.starts_with('#')) {
            let target = self.resolve(&href).ok_or_else(|| SurfaceError::Url {
                url: href.clone(),
                reason: "cannot resolve link".to_string(),
            })?;
            if self.is_same_path(&target) {
                return self.append_page(&target);
            }
            return self.navigate(&target);
        }

        let submits = (tag == "button" && kind.as_deref().is_none_or(|k| k == "submit"))
            || (tag == "input" && kind.as_deref() == Some("submit"));
        if submits {
            return self.submit_form(element);
        }

        Err(SurfaceError::Unsupported(format!(
            "click on <{tag}> without a link needs a script engine"
        )))
    }

    fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SurfaceError> {
        let name = self.with_element(element, |el| el.value().attr("name").map(str::to_string))?;
        let Some(name) = name else {
            return Err(SurfaceError::Unsupported(format!(
                "fill on {element:?} without a name attribute"
            )));
        };
        self.form_values.insert(name, text.to_string());
        Ok(())
    }

    fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SurfaceError> {
        if key.eq_ignore_ascii_case("enter") {
            return self.submit_form(element);
        }
        // Tab/Escape 等按键对静态页面没有效果
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool, SurfaceError> {
        Ok(!self.query_all(selector)?.is_empty())
    }

    fn fetch_authenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError> {
        self.fetch_with(&self.client, url)
    }

    fn fetch_unauthenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError> {
        self.fetch_with(&self.anonymous, url)
    }

    fn recreate(&mut self) -> Result<(), SurfaceError> {
        self.client = build_client(&self.options, true)?;
        self.anonymous = build_client(&self.options, false)?;
        self.current_url = BLANK.to_string();
        self.pages.clear();
        self.expanded.clear();
        self.form_values.clear();
        Ok(())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, SurfaceError> {
    Selector::parse(selector).map_err(|_| SurfaceError::Selector(selector.to_string()))
}

fn build_client(options: &SurfaceOptions, with_cookies: bool) -> Result<Client, SurfaceError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    // 没有启用 gzip 解码，要求服务端返回原始字节
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let client = Client::builder()
        .default_headers(headers)
        .user_agent(options.user_agent.clone())
        .cookie_store(with_cookies)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(options.page_load_timeout.max(options.download_timeout))
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_with_page(url: &str, html: &str) -> HttpSurface {
        let mut surface = HttpSurface::new(SurfaceOptions {
            user_agent: "test".to_string(),
            page_load_timeout: Duration::from_secs(1),
            download_timeout: Duration::from_secs(1),
            headless: true,
        })
        .unwrap();
        surface.start_chain(url.to_string(), html.to_string());
        surface
    }

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form method="post" action="/login/submit">
            <input type="hidden" name="csrf" value="tok">
            <input name="username">
            <input type="password" name="password">
            <button type="submit">Login</button>
          </form>
          <a id="load-more" href="/photos/?page=2">more</a>
          <a href="https://other.example/x">x</a>
          <a class="gone" href="/a" style="display: none">hidden</a>
        </body></html>"#;

    #[test]
    fn query_and_attribute_work_on_last_page() {
        let mut s = surface_with_page("https://site.example/photos/", LOGIN_PAGE);
        let handles = s.query_all("input[name='username']").unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(
            s.attribute(&handles[0], "name").unwrap().as_deref(),
            Some("username")
        );
        assert!(matches!(
            s.query_all("a:has-text('x')"),
            Err(SurfaceError::Selector(_))
        ));
    }

    #[test]
    fn hidden_elements_are_not_visible() {
        let mut s = surface_with_page("https://site.example/photos/", LOGIN_PAGE);
        let gone = s.query_all("a.gone").unwrap();
        assert!(!s.is_visible(&gone[0]).unwrap());
        let csrf = s.query_all("input[name='csrf']").unwrap();
        assert!(!s.is_visible(&csrf[0]).unwrap());
        let more = s.query_all("#load-more").unwrap();
        assert!(s.is_visible(&more[0]).unwrap());
        assert!(!s.is_visible(&ElementHandle::new("#load-more", 3)).unwrap());
    }

    #[test]
    fn collect_hrefs_resolves_relative_links() {
        let mut s = surface_with_page("https://site.example/photos/", LOGIN_PAGE);
        let hrefs = s.evaluate_script(scripts::COLLECT_HREFS).unwrap();
        let hrefs: Vec<String> = serde_json::from_value(hrefs).unwrap();
        assert!(hrefs.contains(&"https://site.example/photos/?page=2".to_string()));
        assert!(hrefs.contains(&"https://other.example/x".to_string()));
        assert!(matches!(
            s.evaluate_script("alert(1)"),
            Err(SurfaceError::Unsupported(_))
        ));
    }

    #[test]
    fn same_path_link_is_an_expansion() {
        let s = surface_with_page("https://site.example/photos/", LOGIN_PAGE);
        assert!(s.is_same_path("https://site.example/photos/?page=2"));
        assert!(!s.is_same_path("https://site.example/photos/"));
        assert!(!s.is_same_path("https://site.example/girls/"));
    }

    #[test]
    fn already_loaded_expansion_is_not_appended_again() {
        let mut s = surface_with_page("https://site.example/photos/", LOGIN_PAGE);
        s.expanded.insert("https://site.example/photos/?page=2".to_string());
        let before = s.evaluate_script(scripts::SCROLL_HEIGHT).unwrap();

        let more = s.query_all("#load-more").unwrap();
        s.click(&more[0]).unwrap();
        assert_eq!(s.pages.len(), 1);
        assert_eq!(s.evaluate_script(scripts::SCROLL_HEIGHT).unwrap(), before);
    }

    #[test]
    fn fill_requires_named_input() {
        let mut s = surface_with_page("https://site.example/login/", LOGIN_PAGE);
        let user = s.query_all("input[name='username']").unwrap();
        s.fill(&user[0], "jane").unwrap();
        assert_eq!(s.form_values.get("username").map(String::as_str), Some("jane"));

        let link = s.query_all("#load-more").unwrap();
        assert!(s.fill(&link[0], "x").is_err());
    }
}
