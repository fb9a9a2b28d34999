//! 登录态判定。
//!
//! 判定依据（按顺序）：
//! 1. 当前 URL 是登录/注册页 → 未登录；
//! 2. 页面有登录入口却没有退出入口 → 未登录；
//! 3. 有退出入口（链接或文字）→ 已登录；
//! 4. 其余情况未登录。用户名出现在页面中只作为佐证记录日志，不单独作数。

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authenticated,
    OnLoginPage,
    LoginWithoutLogout,
    NoLogoutAffordance,
}

impl Verdict {
    pub fn is_authenticated(self) -> bool {
        self == Verdict::Authenticated
    }
}

const LOGOUT_MARKERS: [&str; 3] = ["logout", "log out", "sign out"];
const LOGIN_MARKERS: [&str; 3] = ["login", "log in", "sign in"];

pub fn judge(url: &str, content: &str, logout_elements: usize, username: &str) -> Verdict {
    let url = url.to_lowercase();
    if url.contains("login") || url.contains("join") {
        return Verdict::OnLoginPage;
    }

    let content = content.to_lowercase();
    let has_logout = logout_elements > 0 || LOGOUT_MARKERS.iter().any(|m| content.contains(m));
    let has_login = LOGIN_MARKERS.iter().any(|m| content.contains(m));
    let user = username.trim().to_lowercase();
    let mentions_user = !user.is_empty() && content.contains(&user);

    if has_login && !has_logout {
        return Verdict::LoginWithoutLogout;
    }
    if has_logout {
        if !mentions_user {
            debug!(target: "session", "找到退出入口，但页面未出现用户名");
        }
        return Verdict::Authenticated;
    }
    if mentions_user {
        debug!(target: "session", "页面出现用户名但没有退出入口，按未登录处理");
    }
    Verdict::NoLogoutAffordance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_is_never_authenticated() {
        let v = judge("https://site/join/", "<a href='/logout'>Logout</a>", 1, "jane");
        assert_eq!(v, Verdict::OnLoginPage);
        let v = judge("https://site/LOGIN/?next=/", "logout", 1, "jane");
        assert_eq!(v, Verdict::OnLoginPage);
    }

    #[test]
    fn logout_affordance_means_authenticated() {
        assert!(judge("https://site/", "", 1, "").is_authenticated());
        assert!(judge("https://site/", "<a>Log out</a> login help", 0, "").is_authenticated());
    }

    #[test]
    fn login_without_logout_is_rejected() {
        let v = judge("https://site/", "<a id='login'>Login</a> jane", 0, "jane");
        assert_eq!(v, Verdict::LoginWithoutLogout);
    }

    #[test]
    fn username_alone_is_not_enough() {
        let v = judge("https://site/", "hello jane", 0, "jane");
        assert_eq!(v, Verdict::NoLogoutAffordance);
    }
}
