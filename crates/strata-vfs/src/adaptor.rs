//! Backend adaptor trait.
//!
//! An adaptor is the only code that talks to a storage protocol. It exposes a
//! small set of primitives; everything higher level (recursive delete, tree
//! copy, resume) lives in [`FileSystem`](crate::FileSystem) and works on any
//! adaptor.
//!
//! Adaptors report exact taxonomy errors from [`VfsError`](crate::VfsError)
//! (`NoSuchPath`, `DirectoryNotEmpty`, …) and never panic on races: a path
//! that vanished between two calls is simply `NoSuchPath`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::attributes::{PathAttributes, PosixPermission};
use crate::error::VfsResult;
use crate::path::VfsPath;

/// Byte stream returned by [`Adaptor::open_read`].
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink returned by [`Adaptor::open_write`].
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How [`Adaptor::open_write`] treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create a new file; fail with `PathAlreadyExists` if present.
    CreateExclusive,
    /// Create the file or truncate an existing one.
    CreateOrTruncate,
    /// Append to an existing file; fail with `NoSuchPath` if absent.
    Append,
}

/// Primitive operations one storage backend must provide.
#[async_trait]
pub trait Adaptor: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Scheme this adaptor serves (e.g. `"file"`, `"memory"`, `"sftp"`).
    fn scheme(&self) -> &str;

    /// Resolved location (host, root directory, bucket, …).
    fn location(&self) -> &str;

    /// Separator used by paths on this backend.
    fn separator(&self) -> char {
        crate::path::DEFAULT_SEPARATOR
    }

    /// Initial working directory established at connect time.
    fn entry_path(&self) -> VfsPath {
        VfsPath::with_separator(self.separator(), "")
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Stat a path without following a final symbolic link.
    async fn stat(&self, path: &VfsPath) -> VfsResult<PathAttributes>;

    /// List the direct children of a directory.
    ///
    /// Some backends also report synthetic `.` and `..` entries; callers must
    /// be prepared to skip them.
    async fn list_directory(&self, path: &VfsPath) -> VfsResult<Vec<PathAttributes>>;

    /// Open a regular file for reading from its first byte.
    async fn open_read(&self, path: &VfsPath) -> VfsResult<ByteReader>;

    /// Read the target of a symbolic link.
    async fn read_symbolic_link(&self, link: &VfsPath) -> VfsResult<VfsPath>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Open a file for writing.
    async fn open_write(&self, path: &VfsPath, mode: WriteMode) -> VfsResult<ByteWriter>;

    /// Create one directory; the parent must exist.
    async fn create_directory(&self, path: &VfsPath) -> VfsResult<()>;

    /// Create one empty regular file; the parent must exist.
    async fn create_file(&self, path: &VfsPath) -> VfsResult<()>;

    /// Create a symbolic link at `link` pointing to `target`.
    async fn create_symbolic_link(&self, link: &VfsPath, target: &VfsPath) -> VfsResult<()>;

    /// Delete a file or symbolic link.
    async fn delete_file(&self, path: &VfsPath) -> VfsResult<()>;

    /// Delete an empty directory; fails with `DirectoryNotEmpty` otherwise.
    async fn delete_directory(&self, path: &VfsPath) -> VfsResult<()>;

    /// Replace the POSIX permissions of a path.
    async fn set_posix_permissions(
        &self,
        path: &VfsPath,
        permissions: &BTreeSet<PosixPermission>,
    ) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &VfsPath) -> VfsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(crate::VfsError::NoSuchPath(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the underlying connection.
    async fn close(&self) -> VfsResult<()> {
        Ok(())
    }
}
