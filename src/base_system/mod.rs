#![allow(dead_code)]

pub mod album_paths;
pub mod backoff;
pub mod config;
pub mod context;
pub mod instance_lock;
pub mod logging;
pub mod pacing;
