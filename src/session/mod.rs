//! 会话控制器：登录、校验、重新登录与浏览器实例回收。
//!
//! 状态只有 `Absent → Authenticating → Established` 三种；其它组件只能看到
//! “已建立”或“不存在”。自动化界面由控制器独占，外部通过 [`SessionController::surface`]
//! 在单次调用期间借用。

use std::time::Duration;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::automation::{AutomationSurface, SurfaceError};
use crate::base_system::backoff::{self, AttemptError, RetryPolicy};
use crate::base_system::context::Credentials;
use crate::base_system::pacing::{self, Pacer};
use crate::download::PlaceholderOracle;

pub mod verify;

const COOKIE_SELECTORS: [&str; 4] = [
    "button#accept-cookies",
    "button[id*='accept']",
    "button[class*='accept']",
    ".cookie-consent button",
];

const LOGIN_SELECTORS: [&str; 5] = [
    "#login",
    ".login-button",
    "[data-action='login']",
    "a[href*='login']",
    "button[name='login']",
];

pub(crate) const USERNAME_FIELD: &str = "input[name='username']";
pub(crate) const PASSWORD_FIELD: &str = "input[name='password']";
pub(crate) const LOGOUT_SELECTOR: &str = "a[href*='logout']";

const LOGIN_FORM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Authenticating,
    Established,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username or password is not configured")]
    MissingCredentials,
    #[error("login failed for session generation {generation} after {attempts} attempt(s): {cause}")]
    LoginExhausted {
        generation: u64,
        attempts: u32,
        cause: String,
    },
    #[error("failed to recreate automation surface: {0}")]
    Recreate(#[source] SurfaceError),
}

pub struct SessionController<'a> {
    surface: Box<dyn AutomationSurface>,
    credentials: &'a Credentials,
    base_url: String,
    policy: RetryPolicy,
    generation: u64,
    state: SessionState,
}

impl<'a> SessionController<'a> {
    pub fn new(
        surface: Box<dyn AutomationSurface>,
        credentials: &'a Credentials,
        base_url: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            surface,
            credentials,
            base_url: base_url.into(),
            policy,
            generation: 1,
            state: SessionState::Absent,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// 借出自动化界面。不要跨越 [`Self::recycle`] 保存。
    pub fn surface(&mut self) -> &mut dyn AutomationSurface {
        self.surface.as_mut()
    }

    /// 判断当前是否已登录。这是登录态的唯一判定来源。
    pub fn verify(&mut self) -> bool {
        let url = self.surface.current_url();
        let content = match self.surface.page_content() {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "session", "读取页面内容失败，视为未登录: {e}");
                self.mark_lost();
                return false;
            }
        };
        let logout_elements = self
            .surface
            .query_all(LOGOUT_SELECTOR)
            .map(|v| v.len())
            .unwrap_or(0);

        let verdict = verify::judge(&url, &content, logout_elements, &self.credentials.username);
        debug!(target: "session", "登录态校验: {:?} ({})", verdict, url);
        if verdict.is_authenticated() {
            if self.state != SessionState::Authenticating {
                self.state = SessionState::Established;
            }
            true
        } else {
            self.mark_lost();
            false
        }
    }

    fn mark_lost(&mut self) {
        if self.state == SessionState::Established {
            info!(target: "session", "检测到会话失效（第 {} 代）", self.generation);
            self.state = SessionState::Absent;
        }
    }

    /// 完整登录流程，整体交给退避执行器重试。
    pub fn login(&mut self, pacer: &dyn Pacer) -> Result<(), SessionError> {
        if !self.credentials.is_complete() {
            error!(target: "session", "未配置用户名或密码，无法登录");
            self.state = SessionState::Absent;
            return Err(SessionError::MissingCredentials);
        }

        info!(target: "session", "=== 登录（第 {} 代会话）===", self.generation);
        self.state = SessionState::Authenticating;
        let policy = self.policy;
        let result = backoff::execute(&policy, pacer, "登录", |_| self.attempt_login(pacer));

        match result {
            Ok(()) => {
                self.state = SessionState::Established;
                info!(target: "session", "登录成功");
                Ok(())
            }
            Err(exhausted) => {
                self.state = SessionState::Absent;
                error!(target: "session", "登录失败: {exhausted}");
                Err(SessionError::LoginExhausted {
                    generation: self.generation,
                    attempts: exhausted.attempts,
                    cause: format!("{:#}", exhausted.last),
                })
            }
        }
    }

    fn attempt_login(&mut self, pacer: &dyn Pacer) -> Result<(), AttemptError> {
        debug!(target: "session", "打开首页 {}", self.base_url);
        self.surface
            .navigate(&self.base_url)
            .map_err(AttemptError::retryable)?;
        pacer.pause(pacing::AFTER_HOME_LOAD);

        self.accept_cookies(pacer);

        if !self.open_login_form(pacer) {
            return Err(AttemptError::retryable(anyhow!("未找到登录入口")));
        }
        pacer.pause(pacing::AFTER_CLICK);

        let user_field = self
            .surface
            .first_visible(USERNAME_FIELD)
            .ok_or_else(|| AttemptError::retryable(anyhow!("登录表单缺少用户名输入框")))?;
        let pass_field = self
            .surface
            .first_visible(PASSWORD_FIELD)
            .ok_or_else(|| AttemptError::retryable(anyhow!("登录表单缺少密码输入框")))?;

        debug!(target: "session", "填写用户名");
        pacer.pause(pacing::BETWEEN_KEYS);
        self.surface
            .fill(&user_field, &self.credentials.username)
            .map_err(AttemptError::retryable)?;
        pacer.pause(pacing::BETWEEN_KEYS);

        debug!(target: "session", "填写密码");
        self.surface
            .fill(&pass_field, &self.credentials.password)
            .map_err(AttemptError::retryable)?;
        pacer.pause(pacing::AFTER_CLICK);

        let before = self.surface.current_url();
        debug!(target: "session", "提交登录表单");
        self.surface
            .press(&pass_field, "Tab")
            .map_err(AttemptError::retryable)?;
        pacer.pause(pacing::BETWEEN_KEYS);
        self.surface
            .press(&pass_field, "Enter")
            .map_err(AttemptError::retryable)?;
        pacer.pause(pacing::AFTER_LOGIN_SUBMIT);

        if self.surface.current_url() == before {
            return Err(AttemptError::retryable(anyhow!("提交登录表单后页面没有跳转")));
        }
        if !self.verify() {
            return Err(AttemptError::retryable(anyhow!("登录校验失败")));
        }
        Ok(())
    }

    fn accept_cookies(&mut self, pacer: &dyn Pacer) {
        for selector in COOKIE_SELECTORS {
            if let Some(button) = self.surface.first_visible(selector) {
                debug!(target: "session", "接受 Cookie 提示: {selector}");
                if self.surface.click(&button).is_ok() {
                    pacer.pause(pacing::AFTER_CLICK);
                }
                return;
            }
        }
    }

    fn open_login_form(&mut self, pacer: &dyn Pacer) -> bool {
        for selector in LOGIN_SELECTORS {
            let Some(button) = self.surface.first_visible(selector) else {
                continue;
            };
            debug!(target: "session", "找到登录入口: {selector}");
            if let Err(e) = self.surface.click(&button) {
                debug!(target: "session", "点击 {selector} 失败: {e}");
                continue;
            }
            pacer.pause(pacing::AFTER_PAGE_LOAD);
            match self.surface.wait_for(USERNAME_FIELD, LOGIN_FORM_TIMEOUT) {
                Ok(true) => return true,
                Ok(false) => debug!(target: "session", "点击 {selector} 后未出现登录表单"),
                Err(e) => debug!(target: "session", "等待登录表单失败: {e}"),
            }
        }
        false
    }

    /// 已登录时什么也不做，否则重新登录。
    pub fn ensure_established(&mut self, pacer: &dyn Pacer) -> Result<(), SessionError> {
        if self.verify() {
            return Ok(());
        }
        info!(target: "session", "会话已失效，重新登录");
        self.login(pacer)
    }

    /// 销毁并重建自动化界面，会话代数加一，作废占位图指纹后重新登录。
    pub fn recycle(
        &mut self,
        oracle: &mut PlaceholderOracle,
        pacer: &dyn Pacer,
    ) -> Result<(), SessionError> {
        info!(target: "session", "=== 重建浏览器实例以释放内存（第 {} 代）===", self.generation);
        self.state = SessionState::Absent;
        oracle.invalidate();
        self.surface.recreate().map_err(SessionError::Recreate)?;
        self.generation += 1;
        self.login(pacer)
    }
}
