//! 测试用的脚本化自动化界面：模拟登录、feed 展开、相册页面与图片下载。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use super::{AutomationSurface, ElementHandle, FetchResponse, SurfaceError, scripts};

pub(crate) const BASE_URL: &str = "https://site.example";
pub(crate) const PHOTO_SELECTOR_PREFIX: &str = "li.photo-container";

#[derive(Debug)]
pub(crate) struct MockState {
    pub username: String,
    pub password: String,
    pub logged_in: bool,
    pub login_form_open: bool,
    pub filled: HashMap<String, String>,
    pub current_url: String,
    pub reject_logins: bool,
    pub reject_logins_after_recreate: bool,
    /// 允许成功登录的次数，超过后拒绝
    pub login_limit: Option<usize>,
    pub navigation_failures: u32,
    /// 这些地址每次打开都失败
    pub unreachable: HashSet<String>,
    pub load_more_remaining: usize,
    /// 用完后"加载更多"按钮仍然可见，但点击不再加载内容
    pub load_more_sticks: bool,
    pub scroll_growth_remaining: usize,
    pub height: u64,
    pub feed_hrefs: Vec<String>,
    pub albums: HashMap<String, Vec<String>>,
    pub album_order: Vec<String>,
    pub assets: HashMap<String, Vec<u8>>,
    pub placeholder: Vec<u8>,
    pub expire_after_fetches: Option<usize>,
    pub authenticated_fetches: Vec<String>,
    pub unauthenticated_fetches: Vec<String>,
    pub login_submissions: usize,
    pub recreate_count: usize,
    pub events: Vec<String>,
}

/// 20KB 的 JPEG 形状数据，`seed` 不同内容就不同。
pub(crate) fn jpeg_bytes(seed: u32) -> Vec<u8> {
    let mut body = vec![0xFF, 0xD8, 0xFF, 0xE0];
    body.extend_from_slice(&seed.to_le_bytes());
    body.resize(20_000, (seed % 251) as u8);
    body
}

impl MockState {
    pub(crate) fn site(albums: usize, images_per_album: usize) -> Self {
        let mut state = Self {
            username: "jane".to_string(),
            password: "secret".to_string(),
            logged_in: false,
            login_form_open: false,
            filled: HashMap::new(),
            current_url: "about:blank".to_string(),
            reject_logins: false,
            reject_logins_after_recreate: false,
            login_limit: None,
            navigation_failures: 0,
            unreachable: HashSet::new(),
            load_more_remaining: 0,
            load_more_sticks: false,
            scroll_growth_remaining: 0,
            height: 1000,
            feed_hrefs: Vec::new(),
            albums: HashMap::new(),
            album_order: Vec::new(),
            assets: HashMap::new(),
            placeholder: jpeg_bytes(u32::MAX),
            expire_after_fetches: None,
            authenticated_fetches: Vec::new(),
            unauthenticated_fetches: Vec::new(),
            login_submissions: 0,
            recreate_count: 0,
            events: Vec::new(),
        };
        for a in 0..albums {
            let album_url = format!("{BASE_URL}/girls/owner{a}/album/{a}/set{a}/");
            let mut images = Vec::new();
            for i in 0..images_per_album {
                let url = format!("https://d1.cloudfront.net/owner{a}/set{a}/img{i}.jpg?sig=t{a}{i}");
                state
                    .assets
                    .insert(url.clone(), jpeg_bytes((a * 1000 + i) as u32));
                images.push(url);
            }
            state.feed_hrefs.push(album_url.clone());
            state.album_order.push(album_url.clone());
            state.albums.insert(album_url, images);
        }
        state
    }

    fn is_album(&self, url: &str) -> bool {
        self.albums.contains_key(url)
    }

    fn album_images(&self) -> Vec<String> {
        self.albums
            .get(&self.current_url)
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) struct MockSurface {
    state: Rc<RefCell<MockState>>,
}

impl MockSurface {
    pub(crate) fn new(state: MockState) -> (Self, Rc<RefCell<MockState>>) {
        let shared = Rc::new(RefCell::new(state));
        (
            Self {
                state: Rc::clone(&shared),
            },
            shared,
        )
    }
}

impl AutomationSurface for MockSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        let mut s = self.state.borrow_mut();
        if s.navigation_failures > 0 || s.unreachable.contains(url) {
            s.navigation_failures = s.navigation_failures.saturating_sub(1);
            return Err(SurfaceError::Navigation {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        s.login_form_open = false;
        if s.is_album(url) {
            s.events.push(format!("album:{url}"));
            if !s.logged_in {
                s.current_url = format!("{BASE_URL}/join/");
                return Ok(());
            }
        }
        s.current_url = url.to_string();
        Ok(())
    }

    fn current_url(&self) -> String {
        self.state.borrow().current_url.clone()
    }

    fn page_content(&self) -> Result<String, SurfaceError> {
        let s = self.state.borrow();
        if s.logged_in {
            Ok(format!("<a href='/logout/'>Logout</a> welcome {}", s.username))
        } else {
            Ok("<a id='login' href='/login/'>Login</a>".to_string())
        }
    }

    fn evaluate_script(&mut self, script: &str) -> Result<Value, SurfaceError> {
        let mut s = self.state.borrow_mut();
        match script {
            scripts::COLLECT_HREFS => Ok(Value::from(s.feed_hrefs.clone())),
            scripts::SCROLL_HEIGHT => Ok(Value::from(s.height)),
            scripts::SCROLL_TO_BOTTOM => {
                if s.scroll_growth_remaining > 0 {
                    s.scroll_growth_remaining -= 1;
                    s.height += 1000;
                }
                Ok(Value::Null)
            }
            other => Err(SurfaceError::Unsupported(other.to_string())),
        }
    }

    fn query_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SurfaceError> {
        let s = self.state.borrow();
        let count = match selector {
            "#login" => usize::from(!s.logged_in && !s.login_form_open),
            "input[name='username']" | "input[name='password']" => usize::from(s.login_form_open),
            "#load-more" => usize::from(s.load_more_remaining > 0 || s.load_more_sticks),
            "a[href*='logout']" => usize::from(s.logged_in),
            "a[href]" => s.album_images().len(),
            sel if sel.starts_with(PHOTO_SELECTOR_PREFIX) => s.album_images().len(),
            _ => 0,
        };
        Ok((0..count).map(|i| ElementHandle::new(selector, i)).collect())
    }

    fn is_visible(&mut self, _element: &ElementHandle) -> Result<bool, SurfaceError> {
        Ok(true)
    }

    fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SurfaceError> {
        if name != "href" {
            return Ok(None);
        }
        let s = self.state.borrow();
        Ok(s.album_images().get(element.index).cloned())
    }

    fn click(&mut self, element: &ElementHandle) -> Result<(), SurfaceError> {
        let mut s = self.state.borrow_mut();
        match element.selector.as_str() {
            "#login" => {
                s.login_form_open = true;
                s.current_url = format!("{BASE_URL}/login/");
            }
            "#load-more" => {
                if s.load_more_remaining > 0 {
                    s.load_more_remaining -= 1;
                    s.height += 1000;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn fill(&mut self, element: &ElementHandle, text: &str) -> Result<(), SurfaceError> {
        self.state
            .borrow_mut()
            .filled
            .insert(element.selector.clone(), text.to_string());
        Ok(())
    }

    fn press(&mut self, element: &ElementHandle, key: &str) -> Result<(), SurfaceError> {
        if key != "Enter" || !element.selector.contains("password") {
            return Ok(());
        }
        let mut s = self.state.borrow_mut();
        s.login_submissions += 1;
        let user_ok = s.filled.get("input[name='username']") == Some(&s.username);
        let pass_ok = s.filled.get("input[name='password']") == Some(&s.password);
        let successful = s.events.iter().filter(|e| *e == "login").count();
        let allowed = s.login_limit.is_none_or(|limit| successful < limit);
        if user_ok && pass_ok && allowed && !s.reject_logins {
            s.logged_in = true;
            s.login_form_open = false;
            s.current_url = format!("{BASE_URL}/");
            s.events.push("login".to_string());
        }
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool, SurfaceError> {
        Ok(!self.query_all(selector)?.is_empty())
    }

    fn fetch_authenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError> {
        let mut s = self.state.borrow_mut();
        s.authenticated_fetches.push(url.to_string());
        if let Some(limit) = s.expire_after_fetches
            && s.authenticated_fetches.len() > limit
        {
            // 只失效一次，重新登录后恢复正常
            s.logged_in = false;
            s.expire_after_fetches = None;
        }
        if !s.logged_in {
            return Ok(FetchResponse {
                status: 200,
                body: s.placeholder.clone(),
            });
        }
        Ok(match s.assets.get(url) {
            Some(body) => FetchResponse {
                status: 200,
                body: body.clone(),
            },
            None => FetchResponse {
                status: 404,
                body: Vec::new(),
            },
        })
    }

    fn fetch_unauthenticated(&mut self, url: &str) -> Result<FetchResponse, SurfaceError> {
        let mut s = self.state.borrow_mut();
        s.unauthenticated_fetches.push(url.to_string());
        Ok(FetchResponse {
            status: 200,
            body: s.placeholder.clone(),
        })
    }

    fn recreate(&mut self) -> Result<(), SurfaceError> {
        let mut s = self.state.borrow_mut();
        s.recreate_count += 1;
        s.logged_in = false;
        s.login_form_open = false;
        s.filled.clear();
        s.current_url = "about:blank".to_string();
        s.events.push("recreate".to_string());
        if s.reject_logins_after_recreate {
            s.reject_logins = true;
        }
        Ok(())
    }
}
