//! Typed identifiers for filesystems and copy operations.
//!
//! `FileSystemId` wraps a UUIDv7 so two connections never collide, even
//! across processes. `CopyId` pairs the owning filesystem with a sequence
//! number handed out by that filesystem alone; there is no process-wide
//! counter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one open filesystem connection (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSystemId(uuid::Uuid);

impl FileSystemId {
    /// Create a new time-ordered ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }
}

impl Default for FileSystemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSystemId({})", self.short())
    }
}

/// Correlation ID of a copy, unique within the filesystem that issued it.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CopyId {
    filesystem: FileSystemId,
    sequence: u64,
}

impl CopyId {
    pub(crate) fn new(filesystem: FileSystemId, sequence: u64) -> Self {
        Self {
            filesystem,
            sequence,
        }
    }

    /// Filesystem that issued this ID.
    pub fn filesystem(&self) -> FileSystemId {
        self.filesystem
    }

    /// Position in the issuing filesystem's submission order, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COPY-{}", self.sequence)
    }
}

impl fmt::Debug for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CopyId({}/{})", self.filesystem.short(), self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_ids_are_unique() {
        let a = FileSystemId::new();
        let b = FileSystemId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_copy_id_scoped_to_filesystem() {
        let fs_a = FileSystemId::new();
        let fs_b = FileSystemId::new();
        assert_ne!(CopyId::new(fs_a, 1), CopyId::new(fs_b, 1));
        assert_eq!(CopyId::new(fs_a, 4).to_string(), "COPY-4");
        assert!(CopyId::new(fs_a, 1) < CopyId::new(fs_a, 2));
    }
}
