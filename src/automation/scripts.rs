//! 核心组件使用的预定义页面脚本。
//!
//! 后端可以按原文执行（真实浏览器），也可以只识别这些常量并模拟结果（静态 HTML）。

/// 一次性取出页面上所有链接的绝对地址，返回字符串数组。
pub const COLLECT_HREFS: &str =
    "() => Array.from(document.querySelectorAll('a[href]')).map(a => a.href)";

/// 当前页面高度，返回数字。
pub const SCROLL_HEIGHT: &str = "document.body.scrollHeight";

/// 滚动到页面底部，触发无限滚动加载。
pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";
