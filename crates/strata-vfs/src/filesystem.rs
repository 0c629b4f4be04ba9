//! The caller-facing filesystem handle.
//!
//! A [`FileSystem`] wraps one adaptor connection and composes its primitives
//! into the operations callers actually want: recursive create/list/delete,
//! guarded stream opening, and asynchronous copies between any two
//! filesystems.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::adaptor::{Adaptor, ByteReader, ByteWriter, WriteMode};
use crate::attributes::{PathAttributes, PosixPermission};
use crate::config::EngineConfig;
use crate::copy::{CopyEngine, CopyMode, CopyStatus};
use crate::error::{VfsError, VfsResult};
use crate::ids::{CopyId, FileSystemId};
use crate::path::VfsPath;

struct Inner {
    id: FileSystemId,
    adaptor: Arc<dyn Adaptor>,
    open: AtomicBool,
    engine: CopyEngine,
}

/// Handle to one open backend connection.
///
/// Cheap to clone; every clone refers to the same connection and copy
/// engine. Two handles are equal iff they share an ID.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<Inner>,
}

/// Non-owning reference held by copy workers.
#[derive(Clone)]
pub(crate) struct WeakFileSystem(Weak<Inner>);

impl WeakFileSystem {
    pub(crate) fn upgrade(&self) -> Option<FileSystem> {
        self.0.upgrade().map(|inner| FileSystem { inner })
    }
}

impl FileSystem {
    /// Open a filesystem over `adaptor` with the default engine settings.
    ///
    /// Must be called from within a tokio runtime: the copy workers are
    /// spawned on it.
    pub fn open(adaptor: Arc<dyn Adaptor>) -> VfsResult<Self> {
        Self::with_config(adaptor, EngineConfig::default())
    }

    /// Open a filesystem over `adaptor` with explicit engine settings.
    pub fn with_config(adaptor: Arc<dyn Adaptor>, config: EngineConfig) -> VfsResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| VfsError::other(format!("FileSystem::open needs a tokio runtime: {e}")))?;

        let id = FileSystemId::new();
        let (engine, rx) = CopyEngine::new(id, config.validated());
        let fs = Self {
            inner: Arc::new(Inner {
                id,
                adaptor,
                open: AtomicBool::new(true),
                engine,
            }),
        };
        fs.inner.engine.spawn_workers(&runtime, fs.downgrade(), rx);

        tracing::info!(
            "opened {}://{} as {} ({} copy workers)",
            fs.scheme(),
            fs.location(),
            id.short(),
            fs.config().workers
        );
        Ok(fs)
    }

    pub(crate) fn downgrade(&self) -> WeakFileSystem {
        WeakFileSystem(Arc::downgrade(&self.inner))
    }

    pub(crate) fn adaptor(&self) -> &dyn Adaptor {
        self.inner.adaptor.as_ref()
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        self.inner.engine.config()
    }

    pub(crate) fn ensure_open(&self) -> VfsResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(VfsError::not_connected(format!(
                "{}://{}",
                self.scheme(),
                self.location()
            )))
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn id(&self) -> FileSystemId {
        self.inner.id
    }

    pub fn scheme(&self) -> &str {
        self.inner.adaptor.scheme()
    }

    pub fn location(&self) -> &str {
        self.inner.adaptor.location()
    }

    /// Working directory established when the adaptor connected.
    pub fn entry_path(&self) -> VfsPath {
        self.inner.adaptor.entry_path()
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn exists(&self, path: &VfsPath) -> VfsResult<bool> {
        self.ensure_open()?;
        self.adaptor().exists(path).await
    }

    pub async fn get_attributes(&self, path: &VfsPath) -> VfsResult<PathAttributes> {
        self.ensure_open()?;
        self.adaptor().stat(path).await
    }

    /// List `dir`, optionally descending into every subdirectory.
    ///
    /// Each directory entry appears before its own descendants. Synthetic
    /// `.`/`..` entries are never returned or followed.
    #[tracing::instrument(skip(self), name = "fs.list")]
    pub async fn list(&self, dir: &VfsPath, recursive: bool) -> VfsResult<Vec<PathAttributes>> {
        self.ensure_open()?;
        let attrs = self.adaptor().stat(dir).await?;
        if !attrs.is_directory() {
            return Err(VfsError::invalid_path(format!("{dir} is not a directory")));
        }

        let mut listed = Vec::new();
        let mut levels = vec![self.adaptor().list_directory(dir).await?.into_iter()];
        while let Some(level) = levels.last_mut() {
            let Some(entry) = level.next() else {
                levels.pop();
                continue;
            };
            if entry.path().is_dot_entry() {
                continue;
            }
            let descend = recursive && entry.is_directory();
            let path = entry.path().clone();
            listed.push(entry);
            if descend {
                levels.push(self.adaptor().list_directory(&path).await?.into_iter());
            }
        }
        Ok(listed)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create one directory. The parent must exist; the target must not.
    pub async fn create_directory(&self, dir: &VfsPath) -> VfsResult<()> {
        self.ensure_open()?;
        self.require_parent(dir).await?;
        if self.adaptor().exists(dir).await? {
            return Err(VfsError::already_exists(dir));
        }
        self.adaptor().create_directory(dir).await
    }

    /// Create `dir` and every missing ancestor.
    #[tracing::instrument(skip(self), name = "fs.create_directories")]
    pub async fn create_directories(&self, dir: &VfsPath) -> VfsResult<()> {
        self.ensure_open()?;

        let mut missing = Vec::new();
        let mut current = Some(dir.clone());
        while let Some(path) = current {
            match self.adaptor().stat(&path).await {
                Ok(attrs) => {
                    if &path == dir {
                        return Err(VfsError::already_exists(dir));
                    }
                    if !attrs.is_directory() {
                        return Err(VfsError::invalid_path(format!(
                            "{path} exists and is not a directory"
                        )));
                    }
                    break;
                }
                Err(VfsError::NoSuchPath(_)) => {
                    current = path.parent();
                    missing.push(path);
                }
                Err(e) => return Err(e),
            }
        }

        for path in missing.iter().rev() {
            tracing::debug!("creating {path}");
            self.adaptor().create_directory(path).await?;
        }
        Ok(())
    }

    /// Create an empty regular file. The parent must exist; the target must
    /// not.
    pub async fn create_file(&self, path: &VfsPath) -> VfsResult<()> {
        self.ensure_open()?;
        self.require_parent(path).await?;
        if self.adaptor().exists(path).await? {
            return Err(VfsError::already_exists(path));
        }
        self.adaptor().create_file(path).await
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete a file, link or directory.
    ///
    /// A non-empty directory is only removed when `recursive` is set;
    /// otherwise it fails with `DirectoryNotEmpty` and is left untouched.
    #[tracing::instrument(skip(self), name = "fs.delete")]
    pub async fn delete(&self, path: &VfsPath, recursive: bool) -> VfsResult<()> {
        self.ensure_open()?;
        self.delete_entry(path.clone(), recursive).await
    }

    fn delete_entry(&self, path: VfsPath, recursive: bool) -> BoxFuture<'_, VfsResult<()>> {
        async move {
            let attrs = self.adaptor().stat(&path).await?;
            if !attrs.is_directory() {
                return self.adaptor().delete_file(&path).await;
            }
            if recursive {
                for entry in self.adaptor().list_directory(&path).await? {
                    if entry.path().is_dot_entry() {
                        continue;
                    }
                    self.delete_entry(entry.path().clone(), true).await?;
                }
            }
            self.adaptor().delete_directory(&path).await
        }
        .boxed()
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Open a regular file for reading.
    pub async fn read_from_file(&self, path: &VfsPath) -> VfsResult<ByteReader> {
        self.ensure_open()?;
        self.require_kind(path, PathAttributes::is_regular, "a regular file")
            .await?;
        self.adaptor().open_read(path).await
    }

    /// Create a new file and open it for writing. Never overwrites.
    pub async fn write_to_file(&self, path: &VfsPath) -> VfsResult<ByteWriter> {
        self.ensure_open()?;
        self.require_parent(path).await?;
        if self.adaptor().exists(path).await? {
            return Err(VfsError::already_exists(path));
        }
        self.adaptor()
            .open_write(path, WriteMode::CreateExclusive)
            .await
    }

    /// Open an existing regular file for appending.
    pub async fn append_to_file(&self, path: &VfsPath) -> VfsResult<ByteWriter> {
        self.ensure_open()?;
        self.require_kind(path, PathAttributes::is_regular, "a regular file")
            .await?;
        self.adaptor().open_write(path, WriteMode::Append).await
    }

    // ========================================================================
    // Links and permissions
    // ========================================================================

    pub async fn read_symbolic_link(&self, path: &VfsPath) -> VfsResult<VfsPath> {
        self.ensure_open()?;
        self.require_kind(path, PathAttributes::is_symbolic_link, "a symbolic link")
            .await?;
        self.adaptor().read_symbolic_link(path).await
    }

    pub async fn set_posix_file_permissions(
        &self,
        path: &VfsPath,
        permissions: &BTreeSet<PosixPermission>,
    ) -> VfsResult<()> {
        self.ensure_open()?;
        self.adaptor().stat(path).await?;
        self.adaptor().set_posix_permissions(path, permissions).await
    }

    // ========================================================================
    // Copies
    // ========================================================================

    /// Queue a copy of `source` on this filesystem to `destination` on
    /// `destination_fs`, which may be this filesystem or any other.
    ///
    /// Returns immediately; progress is observed through the returned ID on
    /// this filesystem. Directories require `recursive`.
    pub fn copy(
        &self,
        source: &VfsPath,
        destination_fs: &FileSystem,
        destination: &VfsPath,
        mode: CopyMode,
        recursive: bool,
    ) -> VfsResult<CopyId> {
        self.ensure_open()?;
        destination_fs.ensure_open()?;
        self.inner
            .engine
            .submit(source, destination_fs, destination, mode, recursive)
    }

    /// Cancel a copy and wait until it has actually stopped.
    ///
    /// Cancelling a copy that already finished returns its final status
    /// unchanged.
    pub async fn cancel(&self, id: CopyId) -> VfsResult<CopyStatus> {
        self.ensure_open()?;
        self.inner.engine.cancel(id).await
    }

    /// Current status, without waiting.
    pub fn get_status(&self, id: CopyId) -> VfsResult<CopyStatus> {
        self.ensure_open()?;
        self.inner.engine.status(id)
    }

    /// Wait up to `timeout` (forever when `None`) for the copy to finish,
    /// then return its status, finished or not. Timing out never cancels.
    pub async fn wait_until_done(
        &self,
        id: CopyId,
        timeout: Option<Duration>,
    ) -> VfsResult<CopyStatus> {
        self.ensure_open()?;
        self.inner.engine.wait(id, timeout).await
    }

    /// Forget a finished copy and return its final status.
    pub fn clear_status(&self, id: CopyId) -> VfsResult<CopyStatus> {
        self.ensure_open()?;
        self.inner.engine.clear(id)
    }

    /// IDs of every copy this filesystem is tracking.
    pub fn copies(&self) -> VfsResult<Vec<CopyId>> {
        self.ensure_open()?;
        Ok(self.inner.engine.ids())
    }

    /// Cancel every copy, stop the workers, and release the adaptor.
    #[tracing::instrument(skip(self), fields(fs = %self.id().short()), name = "fs.close")]
    pub async fn close(&self) -> VfsResult<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Err(VfsError::not_connected(self.location()));
        }
        self.inner.engine.shutdown().await;
        self.adaptor().close().await?;
        tracing::info!("closed {}://{}", self.scheme(), self.location());
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_parent(&self, path: &VfsPath) -> VfsResult<()> {
        let Some(parent) = path.parent() else {
            return Err(VfsError::already_exists(path));
        };
        let attrs = self.adaptor().stat(&parent).await?;
        if attrs.is_directory() {
            Ok(())
        } else {
            Err(VfsError::invalid_path(format!("{parent} is not a directory")))
        }
    }

    async fn require_kind(
        &self,
        path: &VfsPath,
        is_kind: fn(&PathAttributes) -> bool,
        expected: &str,
    ) -> VfsResult<PathAttributes> {
        let attrs = self.adaptor().stat(path).await?;
        if is_kind(&attrs) {
            Ok(attrs)
        } else {
            Err(VfsError::invalid_path(format!("{path} is not {expected}")))
        }
    }
}

impl PartialEq for FileSystem {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for FileSystem {}

impl Hash for FileSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("id", &self.inner.id)
            .field("scheme", &self.scheme())
            .field("location", &self.location())
            .field("open", &self.is_open())
            .field("engine", &self.inner.engine)
            .finish()
    }
}
