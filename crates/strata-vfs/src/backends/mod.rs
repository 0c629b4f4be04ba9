//! In-tree adaptors.
//!
//! Backends implement [`Adaptor`](crate::Adaptor) for different storage types.

#[cfg(unix)]
mod local;
mod memory;

#[cfg(unix)]
pub use local::LocalBackend;
pub use memory::MemoryBackend;
