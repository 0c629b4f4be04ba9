//! Recursive copies, symbolic links, synthetic dot entries, and copies
//! between different backends.

use std::sync::Arc;
use std::time::Duration;

use strata_vfs::{
    Adaptor, AdaptorRegistry, CopyMode, CopyState, CopyStatus, EngineConfig, FileSystem,
    MemoryBackend, VfsError, VfsPath,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn open(backend: MemoryBackend) -> FileSystem {
    FileSystem::open(Arc::new(backend)).unwrap()
}

async fn put(fs: &FileSystem, path: &str, data: &[u8]) {
    let mut w = fs.write_to_file(&VfsPath::new(path)).await.unwrap();
    w.write_all(data).await.unwrap();
    w.shutdown().await.unwrap();
}

async fn slurp(fs: &FileSystem, path: &str) -> Vec<u8> {
    let mut r = fs.read_from_file(&VfsPath::new(path)).await.unwrap();
    let mut out = Vec::new();
    r.read_to_end(&mut out).await.unwrap();
    out
}

/// `/a` with `f1` (10 bytes) and `sub/f2` (5 bytes).
async fn sample_tree(fs: &FileSystem) {
    fs.create_directories(&VfsPath::new("/a/sub")).await.unwrap();
    put(fs, "/a/f1", b"0123456789").await;
    put(fs, "/a/sub/f2", b"abcde").await;
}

async fn copy_tree(
    source: &FileSystem,
    from: &str,
    target: &FileSystem,
    to: &str,
    mode: CopyMode,
) -> CopyStatus {
    let id = source
        .copy(&VfsPath::new(from), target, &VfsPath::new(to), mode, true)
        .unwrap();
    source.wait_until_done(id, None).await.unwrap()
}

#[tokio::test]
async fn test_tree_copy_totals() {
    let fs = open(MemoryBackend::new());
    sample_tree(&fs).await;

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Create).await;

    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(status.bytes_to_copy, Some(15));
    assert_eq!(status.bytes_copied, 15);
    assert_eq!(slurp(&fs, "/b/f1").await, b"0123456789");
    assert_eq!(slurp(&fs, "/b/sub/f2").await, b"abcde");
    assert_eq!(
        fs.get_attributes(&VfsPath::new("/b/sub/f2"))
            .await
            .unwrap()
            .size(),
        5
    );
}

#[tokio::test]
async fn test_tree_copy_into_existing_directory_with_ignore() {
    let fs = open(MemoryBackend::new());
    sample_tree(&fs).await;
    fs.create_directory(&VfsPath::new("/b")).await.unwrap();
    put(&fs, "/b/f1", b"keep").await;

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Ignore).await;

    assert_eq!(status.state, CopyState::Done);
    assert_eq!(slurp(&fs, "/b/f1").await, b"keep");
    assert_eq!(slurp(&fs, "/b/sub/f2").await, b"abcde");
    assert_eq!(status.bytes_copied, 5);
}

#[tokio::test]
async fn test_tree_copy_onto_file_is_invalid() {
    let fs = open(MemoryBackend::new());
    sample_tree(&fs).await;
    put(&fs, "/b", b"not a dir").await;

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Replace).await;
    assert!(matches!(status.error.as_deref(), Some(VfsError::InvalidPath(_))));
}

#[tokio::test]
async fn test_tree_copy_create_stops_at_first_conflict() {
    let fs = open(MemoryBackend::new());
    sample_tree(&fs).await;
    fs.create_directories(&VfsPath::new("/b/sub")).await.unwrap();
    put(&fs, "/b/sub/f2", b"old").await;

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Create).await;

    assert!(matches!(
        status.error.as_deref(),
        Some(VfsError::PathAlreadyExists(_))
    ));
    assert_eq!(slurp(&fs, "/b/sub/f2").await, b"old");
}

#[tokio::test]
async fn test_tree_copy_into_own_subtree_is_refused() {
    let fs = open(MemoryBackend::new());
    sample_tree(&fs).await;

    let status = copy_tree(&fs, "/a", &fs, "/a/sub/nested", CopyMode::Create).await;
    assert!(
        matches!(status.error.as_deref(), Some(VfsError::InvalidPath(_))),
        "{status}"
    );
    assert!(!fs.exists(&VfsPath::new("/a/sub/nested")).await.unwrap());

    let status = copy_tree(&fs, "/a", &fs, "/a", CopyMode::Ignore).await;
    assert!(matches!(status.error.as_deref(), Some(VfsError::InvalidPath(_))));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_tree_copy_stops_before_later_files() {
    let fs = FileSystem::with_config(
        Arc::new(MemoryBackend::new().with_read_latency(Duration::from_millis(5))),
        EngineConfig::new().with_buffer_size(1024),
    )
    .unwrap();
    fs.create_directories(&VfsPath::new("/a/sub")).await.unwrap();
    let data = vec![7u8; 16 * 1024];
    for name in ["/a/f1", "/a/f2", "/a/f3", "/a/sub/f4"] {
        put(&fs, name, &data).await;
    }

    let id = fs
        .copy(&VfsPath::new("/a"), &fs, &VfsPath::new("/b"), CopyMode::Create, true)
        .unwrap();
    loop {
        let status = fs.get_status(id).unwrap();
        if status.bytes_copied > 0 || status.is_done() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let status = fs.cancel(id).await.unwrap();

    assert_eq!(status.state, CopyState::Failed);
    assert!(status.was_cancelled(), "{status}");
    assert_eq!(status.bytes_to_copy, Some(4 * 16 * 1024));
    assert!(status.bytes_copied < 16 * 1024);

    // Pass 1 finished; pass 2 stopped inside the first file
    assert!(fs.exists(&VfsPath::new("/b/sub")).await.unwrap());
    assert!(fs.exists(&VfsPath::new("/b/f1")).await.unwrap());
    for name in ["/b/f2", "/b/f3", "/b/sub/f4"] {
        assert!(!fs.exists(&VfsPath::new(name)).await.unwrap(), "{name}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_tree_copy_creates_nothing() {
    let fs = FileSystem::with_config(
        Arc::new(MemoryBackend::new().with_read_latency(Duration::from_millis(5))),
        EngineConfig::new().with_buffer_size(1024),
    )
    .unwrap();
    sample_tree(&fs).await;
    put(&fs, "/big", &vec![1u8; 64 * 1024]).await;

    let busy = fs
        .copy(&VfsPath::new("/big"), &fs, &VfsPath::new("/big2"), CopyMode::Create, false)
        .unwrap();
    let tree = fs
        .copy(&VfsPath::new("/a"), &fs, &VfsPath::new("/b"), CopyMode::Create, true)
        .unwrap();
    let status = fs.cancel(tree).await.unwrap();
    assert!(status.was_cancelled(), "{status}");

    fs.wait_until_done(busy, None).await.unwrap();
    assert!(!fs.exists(&VfsPath::new("/b")).await.unwrap());
}

#[tokio::test]
async fn test_nested_symlinks_are_skipped() {
    let backend = MemoryBackend::named("links");
    let fs = open(backend.clone());
    sample_tree(&fs).await;
    backend
        .create_symbolic_link(&VfsPath::new("/a/link"), &VfsPath::new("f1"))
        .await
        .unwrap();

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Create).await;

    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(status.bytes_copied, 15);
    assert!(fs.exists(&VfsPath::new("/b/f1")).await.unwrap());
    assert!(!fs.exists(&VfsPath::new("/b/link")).await.unwrap());
}

#[tokio::test]
async fn test_top_level_symlink_is_recreated() {
    let backend = MemoryBackend::named("links");
    let fs = open(backend.clone());
    put(&fs, "/target", b"payload").await;
    backend
        .create_symbolic_link(&VfsPath::new("/link"), &VfsPath::new("/target"))
        .await
        .unwrap();

    let status = copy_tree(&fs, "/link", &fs, "/copy", CopyMode::Create).await;
    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(
        fs.read_symbolic_link(&VfsPath::new("/copy")).await.unwrap(),
        VfsPath::new("/target")
    );

    let status = copy_tree(&fs, "/link", &fs, "/copy", CopyMode::Create).await;
    assert!(matches!(
        status.error.as_deref(),
        Some(VfsError::PathAlreadyExists(_))
    ));

    let status = copy_tree(&fs, "/link", &fs, "/copy", CopyMode::Replace).await;
    assert_eq!(status.state, CopyState::Done);

    let status = copy_tree(&fs, "/link", &fs, "/copy", CopyMode::Append).await;
    assert!(matches!(
        status.error.as_deref(),
        Some(VfsError::UnsupportedOperation(_))
    ));
    let status = copy_tree(&fs, "/link", &fs, "/copy", CopyMode::Resume { verify: true }).await;
    assert!(matches!(
        status.error.as_deref(),
        Some(VfsError::UnsupportedOperation(_))
    ));
}

#[tokio::test]
async fn test_symlink_copy_to_backend_without_links() {
    let backend = MemoryBackend::named("links");
    let src = open(backend.clone());
    let dst = open(MemoryBackend::new().without_symlinks());
    backend
        .create_symbolic_link(&VfsPath::new("/link"), &VfsPath::new("/anywhere"))
        .await
        .unwrap();

    let status = copy_tree(&src, "/link", &dst, "/link", CopyMode::Create).await;
    assert!(matches!(
        status.error.as_deref(),
        Some(VfsError::UnsupportedOperation(_))
    ));
}

// ============================================================================
// Synthetic dot entries
// ============================================================================

#[tokio::test]
async fn test_dot_entries_never_followed() {
    let fs = open(MemoryBackend::new().with_dot_entries());
    sample_tree(&fs).await;

    let listed = fs.list(&VfsPath::new("/a"), true).await.unwrap();
    let names: Vec<String> = listed.iter().map(|a| a.path().to_string()).collect();
    assert_eq!(names, vec!["/a/f1", "/a/sub", "/a/sub/f2"]);

    let status = copy_tree(&fs, "/a", &fs, "/b", CopyMode::Create).await;
    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(status.bytes_copied, 15);

    fs.delete(&VfsPath::new("/a"), true).await.unwrap();
    assert!(!fs.exists(&VfsPath::new("/a")).await.unwrap());
    assert!(fs.exists(&VfsPath::new("/b/sub/f2")).await.unwrap());
}

// ============================================================================
// Cross-backend
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_memory_to_local_tree_copy() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AdaptorRegistry::with_defaults();
    let memory = registry.connect("memory", "cross").await.unwrap();
    let disk = registry
        .connect("file", &dir.path().display().to_string())
        .await
        .unwrap();
    sample_tree(&memory).await;

    let status = copy_tree(&memory, "/a", &disk, "/b", CopyMode::Create).await;

    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(status.bytes_copied, 15);
    assert_eq!(std::fs::read(dir.path().join("b/f1")).unwrap(), b"0123456789");
    assert_eq!(std::fs::read(dir.path().join("b/sub/f2")).unwrap(), b"abcde");

    // And back again, through the disk filesystem's own engine
    let status = copy_tree(&disk, "/b", &memory, "/c", CopyMode::Create).await;
    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(slurp(&memory, "/c/sub/f2").await, b"abcde");
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_resume_after_partial_copy() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AdaptorRegistry::with_defaults();
    let memory = registry.connect("memory", "resume").await.unwrap();
    let disk = registry
        .connect("file", &dir.path().display().to_string())
        .await
        .unwrap();

    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 7) as u8).collect();
    put(&memory, "/big", &data).await;
    std::fs::write(dir.path().join("big"), &data[..12_345]).unwrap();

    let id = memory
        .copy(
            &VfsPath::new("/big"),
            &disk,
            &VfsPath::new("/big"),
            CopyMode::Resume { verify: true },
            false,
        )
        .unwrap();
    let status = memory.wait_until_done(id, None).await.unwrap();

    assert_eq!(status.state, CopyState::Done, "{status}");
    assert_eq!(status.bytes_copied, (20_000 - 12_345) as u64);
    assert_eq!(std::fs::read(dir.path().join("big")).unwrap(), data);
}
