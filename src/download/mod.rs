//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：MediaItem / DownloadOutcome / AlbumReport
//! - `placeholder`：占位图指纹
//! - `validator`：本地文件校验
//! - `engine`：单张图片下载与原子写盘
//! - `album`：相册页解析与逐张下载

pub mod album;
pub mod engine;
pub mod models;
pub mod placeholder;
pub mod validator;

pub use album::AlbumError;
pub use engine::DownloadEngine;
pub use models::{AlbumReport, OutcomeCounts};
pub use placeholder::PlaceholderOracle;
