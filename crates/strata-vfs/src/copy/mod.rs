//! Asynchronous copy engine.
//!
//! [`FileSystem::copy`](crate::FileSystem::copy) registers a unit and hands
//! it to the filesystem's worker pool; callers then poll it with
//! `get_status`, block on it with `wait_until_done`, or stop it with `cancel`.
//!
//! ```text
//!   copy() ──► CopyTable (parking_lot) ──► mpsc queue ──► worker task(s)
//!                  ▲                                         │
//!                  └──── progress / terminal watch ◄─────────┘
//! ```

mod engine;
mod transfer;
mod unit;

use std::fmt;
use std::sync::Arc;

use crate::error::VfsError;
use crate::ids::CopyId;

pub(crate) use engine::CopyEngine;
pub(crate) use unit::CopyUnit;

/// How a copy reconciles with an existing destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Fail with `PathAlreadyExists`.
    Create,
    /// Truncate the destination, then stream the whole source.
    Replace,
    /// Leave the destination alone and report success.
    Ignore,
    /// Stream the whole source after the existing content.
    Append,
    /// Treat the destination as a prefix of the source and send the rest.
    ///
    /// With `verify`, the existing bytes are compared against the source
    /// head first and a mismatch fails with `InvalidData`.
    Resume { verify: bool },
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyMode::Create => write!(f, "create"),
            CopyMode::Replace => write!(f, "replace"),
            CopyMode::Ignore => write!(f, "ignore"),
            CopyMode::Append => write!(f, "append"),
            CopyMode::Resume { verify: false } => write!(f, "resume"),
            CopyMode::Resume { verify: true } => write!(f, "resume+verify"),
        }
    }
}

/// Lifecycle state of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CopyState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is moving bytes.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error (including cancellation).
    Failed,
}

impl CopyState {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, CopyState::Done | CopyState::Failed)
    }
}

/// Point-in-time snapshot of a copy.
#[derive(Debug, Clone)]
pub struct CopyStatus {
    pub id: CopyId,
    pub state: CopyState,
    /// Total bytes the copy will move; `None` until known.
    pub bytes_to_copy: Option<u64>,
    pub bytes_copied: u64,
    /// Set exactly when `state` is `Failed`.
    pub error: Option<Arc<VfsError>>,
}

impl CopyStatus {
    /// True once the copy has stopped, successfully or not.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.state == CopyState::Running
    }

    pub fn has_failed(&self) -> bool {
        self.state == CopyState::Failed
    }

    /// True if the copy failed because it was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.error.as_deref().is_some_and(VfsError::is_cancellation)
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes_to_copy {
            Some(total) => write!(
                f,
                "{} {} {}/{} bytes",
                self.id, self.state, self.bytes_copied, total
            )?,
            None => write!(f, "{} {} {} bytes", self.id, self.state, self.bytes_copied)?,
        }
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}
