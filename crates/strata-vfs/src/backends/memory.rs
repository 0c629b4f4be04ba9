//! In-memory backend.
//!
//! Used for scratch space and testing. All data is ephemeral. A few knobs let
//! it stand in for quirkier remote backends: synthetic `.`/`..` listing
//! entries, no symbolic link support, and per-read latency.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::adaptor::{Adaptor, ByteReader, ByteWriter, WriteMode};
use crate::attributes::{PathAttributes, PosixPermission};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;

const FILE_MODE: u32 = 0o644;
const DIRECTORY_MODE: u32 = 0o755;
const LINK_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
struct Meta {
    created: SystemTime,
    modified: SystemTime,
    accessed: SystemTime,
    permissions: BTreeSet<PosixPermission>,
}

impl Meta {
    fn new(mode: u32) -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            modified: now,
            accessed: now,
            permissions: PosixPermission::from_mode(mode),
        }
    }

    fn touch(&mut self) {
        self.modified = SystemTime::now();
    }

    fn apply(&self, attrs: PathAttributes) -> PathAttributes {
        attrs
            .with_creation_time(self.created)
            .with_last_modified_time(self.modified)
            .with_last_access_time(self.accessed)
            .with_readable(self.permissions.contains(&PosixPermission::OwnerRead))
            .with_writable(self.permissions.contains(&PosixPermission::OwnerWrite))
            .with_executable(self.permissions.contains(&PosixPermission::OwnerExecute))
            .with_permissions(self.permissions.clone())
    }
}

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, meta: Meta },
    Directory { meta: Meta },
    Symlink { target: VfsPath, meta: Meta },
}

impl Entry {
    fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Entry::File { meta, .. } | Entry::Directory { meta } | Entry::Symlink { meta, .. } => {
                meta
            }
        }
    }

    fn attributes(&self, path: VfsPath) -> PathAttributes {
        match self {
            Entry::File { data, meta } => {
                meta.apply(PathAttributes::regular(path, data.len() as u64))
            }
            Entry::Directory { meta } => meta.apply(PathAttributes::directory(path)),
            Entry::Symlink { meta, .. } => meta.apply(PathAttributes::symbolic_link(path)),
        }
    }
}

type Entries = BTreeMap<VfsPath, Entry>;

/// In-memory backend.
///
/// Thread-safe via an internal `RwLock`. Clones share the same store, so a
/// registry can hand out several connections to one named store.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
    location: String,
    dot_entries: bool,
    symlinks: bool,
    read_latency: Option<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a new empty store reported under `location`.
    pub fn named(location: impl Into<String>) -> Self {
        let mut entries = BTreeMap::new();
        // Root directory always exists
        entries.insert(
            VfsPath::root(),
            Entry::Directory {
                meta: Meta::new(DIRECTORY_MODE),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
            location: location.into(),
            dot_entries: false,
            symlinks: true,
            read_latency: None,
        }
    }

    /// Report synthetic `.` and `..` entries in every listing.
    pub fn with_dot_entries(mut self) -> Self {
        self.dot_entries = true;
        self
    }

    /// Refuse symbolic link operations with `UnsupportedOperation`.
    pub fn without_symlinks(mut self) -> Self {
        self.symlinks = false;
        self
    }

    /// Delay every read on an opened stream by `latency`.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Storage key: normalized, with unresolvable `..` clamped at the root.
    fn key(path: &VfsPath) -> VfsPath {
        let normalized = path.normalize();
        VfsPath::from_segments(
            crate::path::DEFAULT_SEPARATOR,
            normalized.segments().iter().filter(|s| s.as_str() != ".."),
        )
    }

    /// Fail unless the parent of `key` is an existing directory.
    fn require_parent(entries: &Entries, key: &VfsPath, path: &VfsPath) -> VfsResult<()> {
        let Some(parent) = key.parent() else {
            return Err(VfsError::already_exists(path));
        };
        match entries.get(&parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(_) => Err(VfsError::invalid_path(format!(
                "parent of {path} is not a directory"
            ))),
            None => Err(VfsError::no_such_path(parent)),
        }
    }

    fn check_symlinks(&self) -> VfsResult<()> {
        if self.symlinks {
            Ok(())
        } else {
            Err(VfsError::unsupported(format!(
                "symbolic links on {}",
                self.location
            )))
        }
    }

    fn insert_new(&self, path: &VfsPath, entry: Entry) -> VfsResult<()> {
        let key = Self::key(path);
        let mut entries = self.entries.write();
        Self::require_parent(&entries, &key, path)?;
        if entries.contains_key(&key) {
            return Err(VfsError::already_exists(path));
        }
        entries.insert(key, entry);
        Ok(())
    }

    fn reader(&self, data: Vec<u8>) -> ByteReader {
        Box::new(MemoryReader {
            inner: io::Cursor::new(data),
            latency: self.read_latency,
            delay: None,
        })
    }
}

#[async_trait]
impl Adaptor for MemoryBackend {
    fn scheme(&self) -> &str {
        "memory"
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn stat(&self, path: &VfsPath) -> VfsResult<PathAttributes> {
        let entries = self.entries.read();
        entries
            .get(&Self::key(path))
            .map(|e| e.attributes(path.clone()))
            .ok_or_else(|| VfsError::no_such_path(path))
    }

    async fn list_directory(&self, path: &VfsPath) -> VfsResult<Vec<PathAttributes>> {
        let key = Self::key(path);
        let entries = self.entries.read();

        let meta = match entries.get(&key) {
            Some(Entry::Directory { meta }) => meta,
            Some(_) => return Err(VfsError::invalid_path(format!("{path} is not a directory"))),
            None => return Err(VfsError::no_such_path(path)),
        };

        let mut result = Vec::new();
        if self.dot_entries {
            result.push(meta.apply(PathAttributes::directory(path.resolve_str("."))));
            result.push(meta.apply(PathAttributes::directory(path.resolve_str(".."))));
        }

        // Keys are ordered, so children of `key` sort by name already
        for (entry_path, entry) in entries.range(key.clone()..) {
            if !entry_path.starts_with(&key) {
                break;
            }
            if entry_path.len() != key.len() + 1 {
                continue;
            }
            if let Some(name) = entry_path.file_name() {
                result.push(entry.attributes(path.resolve_str(name)));
            }
        }
        Ok(result)
    }

    async fn open_read(&self, path: &VfsPath) -> VfsResult<ByteReader> {
        let snapshot = {
            let mut entries = self.entries.write();
            match entries.get_mut(&Self::key(path)) {
                Some(Entry::File { data, meta }) => {
                    meta.accessed = SystemTime::now();
                    data.clone()
                }
                Some(_) => {
                    return Err(VfsError::invalid_path(format!(
                        "{path} is not a regular file"
                    )));
                }
                None => return Err(VfsError::no_such_path(path)),
            }
        };
        Ok(self.reader(snapshot))
    }

    async fn read_symbolic_link(&self, link: &VfsPath) -> VfsResult<VfsPath> {
        self.check_symlinks()?;
        let entries = self.entries.read();
        match entries.get(&Self::key(link)) {
            Some(Entry::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(VfsError::invalid_path(format!(
                "{link} is not a symbolic link"
            ))),
            None => Err(VfsError::no_such_path(link)),
        }
    }

    async fn open_write(&self, path: &VfsPath, mode: WriteMode) -> VfsResult<ByteWriter> {
        let key = Self::key(path);
        {
            let mut entries = self.entries.write();
            match (mode, entries.get_mut(&key)) {
                (WriteMode::CreateExclusive, Some(_)) => {
                    return Err(VfsError::already_exists(path));
                }
                (WriteMode::CreateOrTruncate, Some(Entry::File { data, meta })) => {
                    data.clear();
                    meta.touch();
                }
                (WriteMode::Append, Some(Entry::File { .. })) => {}
                (_, Some(_)) => {
                    return Err(VfsError::invalid_path(format!(
                        "{path} is not a regular file"
                    )));
                }
                (WriteMode::Append, None) => return Err(VfsError::no_such_path(path)),
                (WriteMode::CreateExclusive | WriteMode::CreateOrTruncate, None) => {
                    Self::require_parent(&entries, &key, path)?;
                    entries.insert(
                        key.clone(),
                        Entry::File {
                            data: Vec::new(),
                            meta: Meta::new(FILE_MODE),
                        },
                    );
                }
            }
        }
        Ok(Box::new(MemoryWriter {
            entries: Arc::clone(&self.entries),
            key,
        }))
    }

    async fn create_directory(&self, path: &VfsPath) -> VfsResult<()> {
        self.insert_new(
            path,
            Entry::Directory {
                meta: Meta::new(DIRECTORY_MODE),
            },
        )
    }

    async fn create_file(&self, path: &VfsPath) -> VfsResult<()> {
        self.insert_new(
            path,
            Entry::File {
                data: Vec::new(),
                meta: Meta::new(FILE_MODE),
            },
        )
    }

    async fn create_symbolic_link(&self, link: &VfsPath, target: &VfsPath) -> VfsResult<()> {
        self.check_symlinks()?;
        self.insert_new(
            link,
            Entry::Symlink {
                target: target.clone(),
                meta: Meta::new(LINK_MODE),
            },
        )
    }

    async fn delete_file(&self, path: &VfsPath) -> VfsResult<()> {
        let key = Self::key(path);
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {
                Err(VfsError::invalid_path(format!("{path} is a directory")))
            }
            Some(_) => {
                entries.remove(&key);
                Ok(())
            }
            None => Err(VfsError::no_such_path(path)),
        }
    }

    async fn delete_directory(&self, path: &VfsPath) -> VfsResult<()> {
        let key = Self::key(path);
        if key.is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => {
                return Err(VfsError::invalid_path(format!("{path} is not a directory")));
            }
            None => return Err(VfsError::no_such_path(path)),
        }

        let has_children = entries
            .range(key.clone()..)
            .nth(1)
            .is_some_and(|(k, _)| k.starts_with(&key));
        if has_children {
            return Err(VfsError::directory_not_empty(path));
        }

        entries.remove(&key);
        Ok(())
    }

    async fn set_posix_permissions(
        &self,
        path: &VfsPath,
        permissions: &BTreeSet<PosixPermission>,
    ) -> VfsResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&Self::key(path))
            .ok_or_else(|| VfsError::no_such_path(path))?;
        let meta = entry.meta_mut();
        meta.permissions = permissions.clone();
        meta.touch();
        Ok(())
    }
}

/// Snapshot reader with optional per-read latency.
struct MemoryReader {
    inner: io::Cursor<Vec<u8>>,
    latency: Option<Duration>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(latency) = self.latency {
            let delay = self
                .delay
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(latency)));
            if delay.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            self.delay = None;
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write-through appender into a file entry of the shared store.
struct MemoryWriter {
    entries: Arc<RwLock<Entries>>,
    key: VfsPath,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut entries = self.entries.write();
        match entries.get_mut(&self.key) {
            Some(Entry::File { data, meta }) => {
                data.extend_from_slice(buf);
                meta.touch();
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} vanished while writing", self.key),
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
