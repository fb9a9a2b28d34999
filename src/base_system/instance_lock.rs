//! 单实例进程锁（advisory file lock）。

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fd_lock::{RwLock, RwLockWriteGuard};
use thiserror::Error;

pub const LOCK_FILE_NAME: &str = ".harvester.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (lock file: {0})")]
    AlreadyRunning(PathBuf),
    #[error("failed to open lock file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// 持有期间其他进程无法获取同一把锁；随进程结束释放。
pub struct InstanceLock {
    path: PathBuf,
    _guard: RwLockWriteGuard<'static, File>,
}

impl InstanceLock {
    /// 非阻塞获取排他锁，已被占用时返回 [`LockError::AlreadyRunning`]。
    pub fn try_acquire(dir: &Path) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE_NAME);
        std::fs::create_dir_all(dir).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        // 锁需要活到进程结束，guard 借用的 RwLock 因此放到 'static 上。
        let lock: &'static mut RwLock<File> = Box::leak(Box::new(RwLock::new(file)));
        let guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(LockError::AlreadyRunning(path));
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };

        Ok(Self {
            path,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
