//! Filesystem operations used for container log symlinks.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// The few filesystem calls the shim makes.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Creates `link` pointing at `original`.
    async fn symlink(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Removes the file or symlink at `path`.
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// The host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

#[async_trait]
impl Filesystem for RealFs {
    async fn symlink(&self, original: &Path, link: &Path) -> io::Result<()> {
        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::symlink(original, link).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

type SymlinkHook = dyn Fn(&Path, &Path) -> io::Result<()> + Send + Sync;

/// A filesystem that records calls instead of touching the disk.
#[derive(Clone, Default)]
pub struct FakeFs {
    state: Arc<Mutex<FakeFsState>>,
    symlink_hook: Option<Arc<SymlinkHook>>,
}

#[derive(Debug, Default)]
struct FakeFsState {
    symlinks: Vec<(PathBuf, PathBuf)>,
    removes: Vec<PathBuf>,
}

impl FakeFs {
    /// Creates a fake whose calls all succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every `symlink` call through `hook`, which decides the result.
    #[must_use]
    pub fn with_symlink_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &Path) -> io::Result<()> + Send + Sync + 'static,
    {
        self.symlink_hook = Some(Arc::new(hook));
        self
    }

    /// Paths passed to `remove`, in call order.
    pub fn removes(&self) -> Vec<PathBuf> {
        self.lock().removes.clone()
    }

    /// `(original, link)` pairs passed to `symlink`, in call order.
    pub fn symlinks(&self) -> Vec<(PathBuf, PathBuf)> {
        self.lock().symlinks.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeFsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FakeFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeFs")
            .field("state", &self.state)
            .field("symlink_hook", &self.symlink_hook.is_some())
            .finish()
    }
}

#[async_trait]
impl Filesystem for FakeFs {
    async fn symlink(&self, original: &Path, link: &Path) -> io::Result<()> {
        self.lock()
            .symlinks
            .push((original.to_path_buf(), link.to_path_buf()));
        match &self.symlink_hook {
            Some(hook) => hook(original, link),
            None => Ok(()),
        }
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.lock().removes.push(path.to_path_buf());
        Ok(())
    }
}
