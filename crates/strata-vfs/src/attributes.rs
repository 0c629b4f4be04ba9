//! Metadata snapshots produced by adaptors.
//!
//! A [`PathAttributes`] value is taken at one stat instant and never
//! updated afterwards; callers re-stat when they need fresh data.

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;

/// What kind of entry a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Directory.
    Directory,
    /// Regular file.
    Regular,
    /// Symbolic link (not followed).
    SymbolicLink,
    /// Device, socket, fifo, or anything else the backend reports.
    Other,
}

/// One POSIX permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PosixPermission {
    OwnerRead,
    OwnerWrite,
    OwnerExecute,
    GroupRead,
    GroupWrite,
    GroupExecute,
    OthersRead,
    OthersWrite,
    OthersExecute,
}

impl PosixPermission {
    /// Every permission, highest bit first.
    pub const ALL: [PosixPermission; 9] = [
        PosixPermission::OwnerRead,
        PosixPermission::OwnerWrite,
        PosixPermission::OwnerExecute,
        PosixPermission::GroupRead,
        PosixPermission::GroupWrite,
        PosixPermission::GroupExecute,
        PosixPermission::OthersRead,
        PosixPermission::OthersWrite,
        PosixPermission::OthersExecute,
    ];

    /// The mode bit for this permission (e.g. `0o400` for owner read).
    pub fn bit(self) -> u32 {
        match self {
            PosixPermission::OwnerRead => 0o400,
            PosixPermission::OwnerWrite => 0o200,
            PosixPermission::OwnerExecute => 0o100,
            PosixPermission::GroupRead => 0o040,
            PosixPermission::GroupWrite => 0o020,
            PosixPermission::GroupExecute => 0o010,
            PosixPermission::OthersRead => 0o004,
            PosixPermission::OthersWrite => 0o002,
            PosixPermission::OthersExecute => 0o001,
        }
    }

    /// Decode the low nine bits of a mode.
    pub fn from_mode(mode: u32) -> BTreeSet<PosixPermission> {
        Self::ALL
            .into_iter()
            .filter(|p| mode & p.bit() != 0)
            .collect()
    }

    /// Encode a permission set as mode bits.
    pub fn to_mode(set: &BTreeSet<PosixPermission>) -> u32 {
        set.iter().fold(0, |mode, p| mode | p.bit())
    }
}

/// Immutable metadata snapshot for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathAttributes {
    path: VfsPath,
    kind: EntryKind,
    size: u64,
    creation_time: Option<SystemTime>,
    last_modified_time: Option<SystemTime>,
    last_access_time: Option<SystemTime>,
    readable: bool,
    writable: bool,
    executable: bool,
    owner: Option<String>,
    group: Option<String>,
    permissions: Option<BTreeSet<PosixPermission>>,
}

impl PathAttributes {
    fn new(path: VfsPath, kind: EntryKind, size: u64) -> Self {
        Self {
            path,
            kind,
            size,
            creation_time: None,
            last_modified_time: None,
            last_access_time: None,
            readable: true,
            writable: true,
            executable: false,
            owner: None,
            group: None,
            permissions: None,
        }
    }

    /// Attributes for a directory.
    pub fn directory(path: VfsPath) -> Self {
        Self::new(path, EntryKind::Directory, 0).with_executable(true)
    }

    /// Attributes for a regular file of `size` bytes.
    pub fn regular(path: VfsPath, size: u64) -> Self {
        Self::new(path, EntryKind::Regular, size)
    }

    /// Attributes for a symbolic link.
    pub fn symbolic_link(path: VfsPath) -> Self {
        Self::new(path, EntryKind::SymbolicLink, 0)
    }

    /// Attributes for an entry that is neither file, directory nor link.
    pub fn other(path: VfsPath) -> Self {
        Self::new(path, EntryKind::Other, 0)
    }

    /// Set the creation time.
    pub fn with_creation_time(mut self, time: SystemTime) -> Self {
        self.creation_time = Some(time);
        self
    }

    /// Set the modification time.
    pub fn with_last_modified_time(mut self, time: SystemTime) -> Self {
        self.last_modified_time = Some(time);
        self
    }

    /// Set the access time.
    pub fn with_last_access_time(mut self, time: SystemTime) -> Self {
        self.last_access_time = Some(time);
        self
    }

    /// Set read access for the connecting user.
    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    /// Set write access for the connecting user.
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Set execute access for the connecting user.
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Set the owner name.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the group name.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set POSIX permissions.
    pub fn with_permissions(mut self, permissions: BTreeSet<PosixPermission>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.kind == EntryKind::Regular
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.kind == EntryKind::SymbolicLink
    }

    pub fn is_other(&self) -> bool {
        self.kind == EntryKind::Other
    }

    /// Size in bytes; zero for anything but a regular file.
    pub fn size(&self) -> u64 {
        if self.is_regular() { self.size } else { 0 }
    }

    pub fn creation_time(&self) -> Option<SystemTime> {
        self.creation_time
    }

    pub fn last_modified_time(&self) -> Option<SystemTime> {
        self.last_modified_time
    }

    pub fn last_access_time(&self) -> Option<SystemTime> {
        self.last_access_time
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Derived from the file name so every backend agrees.
    pub fn is_hidden(&self) -> bool {
        self.path.is_hidden()
    }

    /// Owner name, if the backend has owners.
    pub fn owner(&self) -> VfsResult<&str> {
        self.owner
            .as_deref()
            .ok_or_else(|| VfsError::attribute_not_supported("owner"))
    }

    /// Group name, if the backend has groups.
    pub fn group(&self) -> VfsResult<&str> {
        self.group
            .as_deref()
            .ok_or_else(|| VfsError::attribute_not_supported("group"))
    }

    /// POSIX permissions, if the backend has them.
    pub fn permissions(&self) -> VfsResult<&BTreeSet<PosixPermission>> {
        self.permissions
            .as_ref()
            .ok_or_else(|| VfsError::attribute_not_supported("permissions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_kind() {
        let path = VfsPath::new("/x");
        for attrs in [
            PathAttributes::directory(path.clone()),
            PathAttributes::regular(path.clone(), 3),
            PathAttributes::symbolic_link(path.clone()),
            PathAttributes::other(path.clone()),
        ] {
            let flags = [
                attrs.is_directory(),
                attrs.is_regular(),
                attrs.is_symbolic_link(),
                attrs.is_other(),
            ];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        }
    }

    #[test]
    fn test_size_only_for_regular_files() {
        assert_eq!(PathAttributes::regular(VfsPath::new("/f"), 42).size(), 42);
        assert_eq!(PathAttributes::directory(VfsPath::new("/d")).size(), 0);
    }

    #[test]
    fn test_unsupported_attributes_fail() {
        let attrs = PathAttributes::regular(VfsPath::new("/f"), 1);
        assert!(matches!(attrs.owner(), Err(VfsError::AttributeNotSupported(_))));
        assert!(matches!(attrs.group(), Err(VfsError::AttributeNotSupported(_))));
        assert!(matches!(
            attrs.permissions(),
            Err(VfsError::AttributeNotSupported(_))
        ));

        let attrs = attrs.with_owner("amy").with_group("staff");
        assert_eq!(attrs.owner().unwrap(), "amy");
        assert_eq!(attrs.group().unwrap(), "staff");
    }

    #[test]
    fn test_hidden_is_derived_from_name() {
        assert!(PathAttributes::regular(VfsPath::new("/a/.env"), 0).is_hidden());
        assert!(!PathAttributes::regular(VfsPath::new("/.a/env"), 0).is_hidden());
    }

    #[test]
    fn test_permission_mode_round_trip() {
        let perms = PosixPermission::from_mode(0o754);
        assert!(perms.contains(&PosixPermission::OwnerExecute));
        assert!(perms.contains(&PosixPermission::GroupExecute));
        assert!(!perms.contains(&PosixPermission::GroupWrite));
        assert!(perms.contains(&PosixPermission::OthersRead));
        assert_eq!(PosixPermission::to_mode(&perms), 0o754);
    }
}
