//! VFS error types.
//!
//! One taxonomy is shared by every adaptor so callers can branch on the
//! failure without knowing which backend produced it.

use std::fmt;
use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("no such path: {0}")]
    NoSuchPath(String),

    /// Path already exists.
    #[error("path already exists: {0}")]
    PathAlreadyExists(String),

    /// Path exists but has the wrong kind for the operation, or is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The backend has no concept of the requested attribute.
    #[error("attribute not supported: {0}")]
    AttributeNotSupported(String),

    /// The adaptor lacks a capability (e.g. symbolic links).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Backend is out of space.
    #[error("no space left: {0}")]
    NoSpace(String),

    /// The filesystem was closed or never connected.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The connection dropped mid-operation.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Content or size inconsistency (resume/verify mismatch).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The copy was cancelled before it finished.
    #[error("copy cancelled: {0}")]
    CopyCancelled(String),

    /// Unknown copy correlation ID.
    #[error("no such copy: {0}")]
    NoSuchCopy(String),

    /// I/O error that did not map onto a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NoSuchPath error.
    pub fn no_such_path(path: impl fmt::Display) -> Self {
        Self::NoSuchPath(path.to_string())
    }

    /// Create a PathAlreadyExists error.
    pub fn already_exists(path: impl fmt::Display) -> Self {
        Self::PathAlreadyExists(path.to_string())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl fmt::Display) -> Self {
        Self::DirectoryNotEmpty(path.to_string())
    }

    /// Create an AttributeNotSupported error.
    pub fn attribute_not_supported(attribute: impl Into<String>) -> Self {
        Self::AttributeNotSupported(attribute.into())
    }

    /// Create an UnsupportedOperation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl fmt::Display) -> Self {
        Self::PermissionDenied(path.to_string())
    }

    /// Create a NotConnected error.
    pub fn not_connected(location: impl fmt::Display) -> Self {
        Self::NotConnected(location.to_string())
    }

    /// Create an InvalidData error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a CopyCancelled error.
    pub fn copy_cancelled(id: impl fmt::Display) -> Self {
        Self::CopyCancelled(id.to_string())
    }

    /// Create a NoSuchCopy error.
    pub fn no_such_copy(id: impl fmt::Display) -> Self {
        Self::NoSuchCopy(id.to_string())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(err: io::Error, path: impl fmt::Display) -> Self {
        let path = path.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NoSuchPath(path),
            io::ErrorKind::AlreadyExists => Self::PathAlreadyExists(path),
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied(path)
            }
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(path),
            io::ErrorKind::StorageFull => Self::NoSpace(path),
            io::ErrorKind::NotADirectory
            | io::ErrorKind::IsADirectory
            | io::ErrorKind::InvalidInput => Self::InvalidPath(format!("{path}: {err}")),
            io::ErrorKind::InvalidData => Self::InvalidData(format!("{path}: {err}")),
            io::ErrorKind::NotConnected => Self::NotConnected(path),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost(format!("{path}: {err}")),
            io::ErrorKind::Unsupported => Self::UnsupportedOperation(format!("{path}: {err}")),
            _ => Self::Io(err),
        }
    }

    /// Returns true if this error records a cancelled copy.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CopyCancelled(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NoSuchPath(msg) | VfsError::NoSuchCopy(msg) => {
                io::Error::new(io::ErrorKind::NotFound, msg)
            }
            VfsError::PathAlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::AttributeNotSupported(msg) | VfsError::UnsupportedOperation(msg) => {
                io::Error::new(io::ErrorKind::Unsupported, msg)
            }
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NoSpace(msg) => io::Error::new(io::ErrorKind::StorageFull, msg),
            VfsError::NotConnected(msg) => io::Error::new(io::ErrorKind::NotConnected, msg),
            VfsError::ConnectionLost(msg) => io::Error::new(io::ErrorKind::ConnectionReset, msg),
            VfsError::InvalidData(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VfsError::CopyCancelled(msg) => io::Error::new(io::ErrorKind::Interrupted, msg),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
