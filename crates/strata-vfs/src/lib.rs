//! # strata-vfs
//!
//! Backend-agnostic virtual filesystem with an asynchronous copy engine.
//!
//! Key components:
//!
//! - [`VfsPath`] - Immutable hierarchical path, independent of any backend
//! - [`PathAttributes`] - Metadata snapshot produced by a backend
//! - [`Adaptor`] - Primitive operations one storage protocol provides
//! - [`FileSystem`] - Generic algorithms and the copy engine over an adaptor
//! - [`AdaptorRegistry`] - Opens filesystems by scheme and location
//!
//! ## Design Decisions
//!
//! - **Small adaptors**: backends implement stat, list-one-level, open
//!   streams and single-entry create/delete. Recursion, reconciliation and
//!   resume live once, in [`FileSystem`].
//! - **Copies are jobs**: [`FileSystem::copy`] returns a [`CopyId`] at once;
//!   a per-filesystem worker pool does the transfer and reports byte progress.
//! - **Cooperative cancellation**: checked between directories, between
//!   files, and after every buffer.
//!
//! ```no_run
//! # async fn demo() -> strata_vfs::VfsResult<()> {
//! use strata_vfs::{AdaptorRegistry, CopyMode, VfsPath};
//!
//! let registry = AdaptorRegistry::with_defaults();
//! let scratch = registry.connect("memory", "scratch").await?;
//! let disk = registry.connect("file", "/srv/data").await?;
//!
//! let id = scratch.copy(
//!     &VfsPath::new("/reports"),
//!     &disk,
//!     &VfsPath::new("/archive/reports"),
//!     CopyMode::Create,
//!     true,
//! )?;
//! let status = scratch.wait_until_done(id, None).await?;
//! assert!(status.is_done());
//! # Ok(())
//! # }
//! ```

pub mod adaptor;
pub mod attributes;
pub mod backends;
pub mod config;
pub mod copy;
mod error;
mod filesystem;
mod ids;
pub mod path;
pub mod registry;

pub use adaptor::{Adaptor, ByteReader, ByteWriter, WriteMode};
pub use attributes::{EntryKind, PathAttributes, PosixPermission};
pub use backends::MemoryBackend;
#[cfg(unix)]
pub use backends::LocalBackend;
pub use config::{EngineConfig, StatusRetention};
pub use copy::{CopyMode, CopyState, CopyStatus};
pub use error::{VfsError, VfsResult};
pub use filesystem::FileSystem;
pub use ids::{CopyId, FileSystemId};
pub use path::VfsPath;
pub use registry::{AdaptorFactory, AdaptorRegistry, MemoryFactory};
#[cfg(unix)]
pub use registry::LocalFactory;
