//! Local disk backend.
//!
//! Provides access to real filesystem paths, with path security to prevent
//! escaping the root directory.

use std::collections::BTreeSet;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::adaptor::{Adaptor, ByteReader, ByteWriter, WriteMode};
use crate::attributes::{PathAttributes, PosixPermission};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;

/// Local disk backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/data`, then `/logs/today.txt` names `/srv/data/logs/today.txt`.
///
/// Paths are normalized before they reach the disk and re-checked after
/// symbolic links are resolved; anything that lands outside the root is
/// rejected with `InvalidPath`. Link targets are VFS paths anchored at the
/// root and are written to disk relative to the link's directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    location: String,
    read_only: bool,
}

impl LocalBackend {
    /// Create a backend rooted at `root`.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            location: root.display().to_string(),
            root,
            read_only: false,
        }
    }

    /// Create a backend that refuses every write with `PermissionDenied`.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a VFS path onto the disk without following a final symbolic
    /// link.
    ///
    /// The parent directory is canonicalized, so a link anywhere above the
    /// entry that leads outside the root is refused with `InvalidPath`.
    async fn resolve_entry(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        let segments = self.contained_segments(path)?;
        let Some((name, dirs)) = segments.split_last() else {
            return Ok(self.root.clone());
        };
        let parent = dirs
            .iter()
            .fold(self.root.clone(), |full, segment| full.join(segment));
        Ok(self.canonical_within(path, &parent).await?.join(name))
    }

    /// Map a VFS path onto the disk, following symbolic links all the way.
    ///
    /// A path that does not exist yet resolves to its entry location; a
    /// dangling link is refused, since writing through it would create
    /// whatever it points at.
    async fn resolve(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        let entry = self.resolve_entry(path).await?;
        match fs::canonicalize(&entry).await {
            Ok(canonical) => {
                self.check_within(path, &canonical)?;
                Ok(canonical)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match fs::symlink_metadata(&entry).await {
                    Ok(meta) if meta.file_type().is_symlink() => Err(VfsError::invalid_path(
                        format!("{path} is a dangling symbolic link"),
                    )),
                    _ => Ok(entry),
                }
            }
            Err(e) => Err(VfsError::from_io(e, path)),
        }
    }

    /// Normalized segments of `path`, refusing a leading `..`.
    fn contained_segments(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let normalized = path.normalize();
        if normalized.segments().first().is_some_and(|s| s == "..") {
            return Err(VfsError::invalid_path(format!(
                "{path} escapes {}",
                self.root.display()
            )));
        }
        Ok(normalized.segments().to_vec())
    }

    /// Canonicalize the deepest existing ancestor of `dir`, re-append the
    /// missing tail, and check the result is still under the root.
    async fn canonical_within(&self, path: &VfsPath, dir: &Path) -> VfsResult<PathBuf> {
        let mut existing = dir.to_path_buf();
        let mut missing = Vec::new();
        let canonical = loop {
            match fs::canonicalize(&existing).await {
                Ok(canonical) => break canonical,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && existing != self.root => {
                    let Some(name) = existing.file_name() else {
                        return Err(VfsError::from_io(e, path));
                    };
                    missing.push(name.to_os_string());
                    existing.pop();
                }
                Err(e) => return Err(VfsError::from_io(e, path)),
            }
        };
        let full = missing
            .iter()
            .rev()
            .fold(canonical, |full, name| full.join(name));
        self.check_within(path, &full)?;
        Ok(full)
    }

    fn check_within(&self, path: &VfsPath, full: &Path) -> VfsResult<()> {
        if full.starts_with(&self.root) {
            Ok(())
        } else {
            Err(VfsError::invalid_path(format!(
                "{path} resolves to {}, outside {}",
                full.display(),
                self.root.display()
            )))
        }
    }

    /// On-disk form of a link target: relative to the link's directory, so
    /// the link resolves to the same entry it names in the VFS.
    fn link_text(&self, link: &VfsPath, target: &VfsPath) -> VfsResult<PathBuf> {
        let link_segments = self.contained_segments(link)?;
        let target_segments = self.contained_segments(target)?;
        let dirs = &link_segments[..link_segments.len().saturating_sub(1)];
        let common = dirs
            .iter()
            .zip(&target_segments)
            .take_while(|(a, b)| a == b)
            .count();

        let mut text = PathBuf::new();
        for _ in common..dirs.len() {
            text.push("..");
        }
        for segment in &target_segments[common..] {
            text.push(segment);
        }
        if text.as_os_str().is_empty() {
            text.push(".");
        }
        Ok(text)
    }

    /// VFS form of an on-disk link target, anchored at the root.
    fn link_target(&self, link: &VfsPath, text: &Path) -> VfsResult<VfsPath> {
        let escapes = || {
            VfsError::invalid_path(format!(
                "{link} points outside {}",
                self.root.display()
            ))
        };
        let anchored = if text.is_absolute() {
            let inside = text.strip_prefix(&self.root).map_err(|_| escapes())?;
            VfsPath::with_separator(self.separator(), &inside.to_string_lossy())
        } else {
            let base = link.normalize().parent().unwrap_or_default();
            base.resolve(&VfsPath::with_separator(
                self.separator(),
                &text.to_string_lossy(),
            ))
        };
        let normalized = anchored.normalize();
        if normalized.segments().first().is_some_and(|s| s == "..") {
            return Err(escapes());
        }
        Ok(normalized)
    }

    fn check_writable(&self, path: &VfsPath) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::permission_denied(format!("{path} (read-only)")))
        } else {
            Ok(())
        }
    }

    /// Convert `std::fs::Metadata` to a snapshot for `path`.
    fn metadata_to_attributes(path: VfsPath, meta: &std::fs::Metadata) -> PathAttributes {
        let file_type = meta.file_type();
        let attrs = if file_type.is_symlink() {
            PathAttributes::symbolic_link(path)
        } else if file_type.is_dir() {
            PathAttributes::directory(path)
        } else if file_type.is_file() {
            PathAttributes::regular(path, meta.len())
        } else {
            PathAttributes::other(path)
        };

        let mode = meta.permissions().mode();
        let mut attrs = attrs
            .with_readable(mode & PosixPermission::OwnerRead.bit() != 0)
            .with_writable(mode & PosixPermission::OwnerWrite.bit() != 0)
            .with_executable(mode & PosixPermission::OwnerExecute.bit() != 0)
            .with_permissions(PosixPermission::from_mode(mode))
            .with_owner(meta.uid().to_string())
            .with_group(meta.gid().to_string());
        if let Ok(time) = meta.created() {
            attrs = attrs.with_creation_time(time);
        }
        if let Ok(time) = meta.modified() {
            attrs = attrs.with_last_modified_time(time);
        }
        if let Ok(time) = meta.accessed() {
            attrs = attrs.with_last_access_time(time);
        }
        attrs
    }
}

#[async_trait]
impl Adaptor for LocalBackend {
    fn scheme(&self) -> &str {
        "file"
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn stat(&self, path: &VfsPath) -> VfsResult<PathAttributes> {
        let full_path = self.resolve_entry(path).await?;
        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        Ok(Self::metadata_to_attributes(path.clone(), &meta))
    }

    async fn list_directory(&self, path: &VfsPath) -> VfsResult<Vec<PathAttributes>> {
        let full_path = self.resolve(path).await?;
        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VfsError::from_io(e, path))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = path.resolve_str(&name);
            match fs::symlink_metadata(entry.path()).await {
                Ok(meta) => entries.push(Self::metadata_to_attributes(child, &meta)),
                // Removed between readdir and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(VfsError::from_io(e, child)),
            }
        }

        entries.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(entries)
    }

    async fn open_read(&self, path: &VfsPath) -> VfsResult<ByteReader> {
        let full_path = self.resolve(path).await?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    async fn read_symbolic_link(&self, link: &VfsPath) -> VfsResult<VfsPath> {
        let full_path = self.resolve_entry(link).await?;
        let text = fs::read_link(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, link))?;
        self.link_target(link, &text)
    }

    async fn open_write(&self, path: &VfsPath, mode: WriteMode) -> VfsResult<ByteWriter> {
        self.check_writable(path)?;
        let full_path = self.resolve(path).await?;

        let mut options = fs::OpenOptions::new();
        match mode {
            WriteMode::CreateExclusive => options.write(true).create_new(true),
            WriteMode::CreateOrTruncate => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let file = options
            .open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    async fn create_directory(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable(path)?;
        let full_path = self.resolve_entry(path).await?;
        fs::create_dir(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))
    }

    async fn create_file(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable(path)?;
        let full_path = self.resolve_entry(path).await?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map(drop)
            .map_err(|e| VfsError::from_io(e, path))
    }

    async fn create_symbolic_link(&self, link: &VfsPath, target: &VfsPath) -> VfsResult<()> {
        self.check_writable(link)?;
        let full_path = self.resolve_entry(link).await?;
        let text = self.link_text(link, target)?;
        fs::symlink(text, &full_path)
            .await
            .map_err(|e| VfsError::from_io(e, link))
    }

    async fn delete_file(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable(path)?;
        let full_path = self.resolve_entry(path).await?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))
    }

    async fn delete_directory(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable(path)?;
        let full_path = self.resolve_entry(path).await?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        fs::remove_dir(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path))
    }

    async fn set_posix_permissions(
        &self,
        path: &VfsPath,
        permissions: &BTreeSet<PosixPermission>,
    ) -> VfsResult<()> {
        self.check_writable(path)?;
        let full_path = self.resolve(path).await?;
        let mode = PosixPermission::to_mode(permissions);
        fs::set_permissions(&full_path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| VfsError::from_io(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (backend, dir) = setup();
        let path = VfsPath::new("test.txt");

        let mut w = backend
            .open_write(&path, WriteMode::CreateExclusive)
            .await
            .unwrap();
        w.write_all(b"hello world").await.unwrap();
        w.shutdown().await.unwrap();

        let mut r = backend.open_read(&path).await.unwrap();
        let mut data = Vec::new();
        r.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(std::fs::read(dir.path().join("test.txt")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let (backend, _dir) = setup();
        let missing = backend.stat(&VfsPath::new("nope")).await;
        assert!(matches!(missing, Err(VfsError::NoSuchPath(_))));

        backend.create_file(&VfsPath::new("f")).await.unwrap();
        let again = backend.create_file(&VfsPath::new("f")).await;
        assert!(matches!(again, Err(VfsError::PathAlreadyExists(_))));

        let orphan = backend.create_directory(&VfsPath::new("a/b")).await;
        assert!(matches!(orphan, Err(VfsError::NoSuchPath(_))));
    }

    #[tokio::test]
    async fn test_mkdir_and_list() {
        let (backend, _dir) = setup();
        backend.create_directory(&VfsPath::new("subdir")).await.unwrap();
        backend
            .create_file(&VfsPath::new("subdir/file.txt"))
            .await
            .unwrap();
        backend.create_file(&VfsPath::new("root.txt")).await.unwrap();

        let listing = backend.list_directory(&VfsPath::root()).await.unwrap();
        let names: Vec<_> = listing
            .iter()
            .filter_map(|a| a.path().file_name())
            .collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);
        assert!(listing[1].is_directory());
        assert!(listing[0].owner().is_ok());
    }

    #[tokio::test]
    async fn test_delete_directory_not_empty() {
        let (backend, dir) = setup();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/x"), b"x").unwrap();

        let result = backend.delete_directory(&VfsPath::new("d")).await;
        assert!(matches!(result, Err(VfsError::DirectoryNotEmpty(_))));
        assert!(dir.path().join("d/x").exists());
    }

    #[tokio::test]
    async fn test_read_only() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::read_only(dir.path());
        let result = backend.create_file(&VfsPath::new("test.txt")).await;
        assert!(matches!(result, Err(VfsError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();
        let result = backend.open_read(&VfsPath::new("../../../etc/passwd")).await;
        assert!(matches!(result, Err(VfsError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_symlink() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("target.txt"), b"content").unwrap();

        backend
            .create_symbolic_link(&VfsPath::new("link.txt"), &VfsPath::new("target.txt"))
            .await
            .unwrap();

        let target = backend
            .read_symbolic_link(&VfsPath::new("link.txt"))
            .await
            .unwrap();
        assert_eq!(target, VfsPath::new("target.txt"));
        assert!(backend
            .stat(&VfsPath::new("link.txt"))
            .await
            .unwrap()
            .is_symbolic_link());
    }

    #[tokio::test]
    async fn test_link_target_resolves_from_any_directory() {
        let (backend, dir) = setup();
        std::fs::create_dir_all(dir.path().join("d")).unwrap();
        std::fs::create_dir_all(dir.path().join("links/deep")).unwrap();
        std::fs::write(dir.path().join("d/target.txt"), b"content").unwrap();

        let target = VfsPath::new("/d/target.txt");
        for link in ["/links/deep/l", "/d/sibling", "/top"] {
            backend
                .create_symbolic_link(&VfsPath::new(link), &target)
                .await
                .unwrap();
            let on_disk = dir.path().join(&link[1..]);
            assert_eq!(std::fs::read(&on_disk).unwrap(), b"content", "{link}");
            assert_eq!(
                backend.read_symbolic_link(&VfsPath::new(link)).await.unwrap(),
                target
            );
        }
        assert_eq!(
            std::fs::read_link(dir.path().join("links/deep/l")).unwrap(),
            PathBuf::from("../../d/target.txt")
        );
    }

    #[tokio::test]
    async fn test_escaping_link_target_refused() {
        let (backend, dir) = setup();
        let result = backend
            .create_symbolic_link(&VfsPath::new("/esc"), &VfsPath::new("../../etc"))
            .await;
        assert!(matches!(result, Err(VfsError::InvalidPath(_))));
        assert!(std::fs::symlink_metadata(dir.path().join("esc")).is_err());
    }

    #[tokio::test]
    async fn test_links_out_of_root_are_not_followed() {
        let (backend, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"host data").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("esc")).unwrap();
        std::os::unix::fs::symlink("../../../../../../../../etc", dir.path().join("up")).unwrap();

        let through = backend.stat(&VfsPath::new("/esc/secret")).await;
        assert!(matches!(through, Err(VfsError::InvalidPath(_))));
        let read = backend.open_read(&VfsPath::new("/esc/secret")).await;
        assert!(matches!(read, Err(VfsError::InvalidPath(_))));
        let write = backend
            .open_write(&VfsPath::new("/esc/new"), WriteMode::CreateExclusive)
            .await;
        assert!(matches!(write, Err(VfsError::InvalidPath(_))));
        assert!(!outside.path().join("new").exists());
        let listing = backend.list_directory(&VfsPath::new("/up")).await;
        assert!(matches!(listing, Err(VfsError::InvalidPath(_))));

        // The link itself is still visible, just not traversable
        assert!(backend
            .stat(&VfsPath::new("/esc"))
            .await
            .unwrap()
            .is_symbolic_link());
        let target = backend.read_symbolic_link(&VfsPath::new("/up")).await;
        assert!(matches!(target, Err(VfsError::InvalidPath(_))));
        backend.delete_file(&VfsPath::new("/esc")).await.unwrap();
        assert!(outside.path().join("secret").exists());
    }

    #[tokio::test]
    async fn test_dangling_link_is_not_written_through() {
        let (backend, dir) = setup();
        std::os::unix::fs::symlink("missing.txt", dir.path().join("dangling")).unwrap();
        let result = backend
            .open_write(&VfsPath::new("/dangling"), WriteMode::CreateOrTruncate)
            .await;
        assert!(matches!(result, Err(VfsError::InvalidPath(_))));
        assert!(!dir.path().join("missing.txt").exists());
    }

    #[tokio::test]
    async fn test_set_permissions() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("f"), b"").unwrap();
        let perms = PosixPermission::from_mode(0o640);
        backend
            .set_posix_permissions(&VfsPath::new("f"), &perms)
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("f"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
