//! One tracked copy and the table that owns them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{CopyMode, CopyState, CopyStatus};
use crate::error::{VfsError, VfsResult};
use crate::ids::{CopyId, FileSystemId};
use crate::path::VfsPath;

/// Mutable part of a unit, guarded by the unit's own mutex.
#[derive(Debug)]
struct Progress {
    state: CopyState,
    bytes_to_copy: Option<u64>,
    bytes_copied: u64,
    error: Option<Arc<VfsError>>,
}

/// A copy registered with a filesystem.
///
/// Holds only identities and paths, never filesystem handles, so a retained
/// status cannot keep a connection alive.
#[derive(Debug)]
pub(crate) struct CopyUnit {
    id: CopyId,
    source: VfsPath,
    destination: VfsPath,
    destination_fs: FileSystemId,
    mode: CopyMode,
    recursive: bool,
    cancelled: AtomicBool,
    progress: Mutex<Progress>,
    terminal: watch::Sender<bool>,
}

impl CopyUnit {
    pub(crate) fn new(
        id: CopyId,
        source: VfsPath,
        destination_fs: FileSystemId,
        destination: VfsPath,
        mode: CopyMode,
        recursive: bool,
    ) -> Self {
        let (terminal, _) = watch::channel(false);
        Self {
            id,
            source,
            destination,
            destination_fs,
            mode,
            recursive,
            cancelled: AtomicBool::new(false),
            progress: Mutex::new(Progress {
                state: CopyState::Pending,
                bytes_to_copy: None,
                bytes_copied: 0,
                error: None,
            }),
            terminal,
        }
    }

    pub(crate) fn id(&self) -> CopyId {
        self.id
    }

    pub(crate) fn source(&self) -> &VfsPath {
        &self.source
    }

    pub(crate) fn destination(&self) -> &VfsPath {
        &self.destination
    }

    pub(crate) fn destination_fs(&self) -> FileSystemId {
        self.destination_fs
    }

    pub(crate) fn mode(&self) -> CopyMode {
        self.mode
    }

    pub(crate) fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub(crate) fn status(&self) -> CopyStatus {
        let progress = self.progress.lock();
        CopyStatus {
            id: self.id,
            state: progress.state,
            bytes_to_copy: progress.bytes_to_copy,
            bytes_copied: progress.bytes_copied,
            error: progress.error.clone(),
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.progress.lock().state.is_terminal()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancellation checkpoint.
    pub(crate) fn check_cancelled(&self) -> VfsResult<()> {
        if self.is_cancelled() {
            Err(VfsError::copy_cancelled(self.id))
        } else {
            Ok(())
        }
    }

    /// Raise the cancel flag. A unit still waiting in the queue fails on the
    /// spot; a running one notices at its next checkpoint.
    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let mut progress = self.progress.lock();
        if progress.state == CopyState::Pending {
            progress.state = CopyState::Failed;
            progress.error = Some(Arc::new(VfsError::copy_cancelled(self.id)));
            drop(progress);
            self.terminal.send_replace(true);
        }
    }

    /// Pending → Running. Returns false if the unit already finished
    /// (cancelled while queued).
    pub(crate) fn start(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.state != CopyState::Pending {
            return false;
        }
        progress.state = CopyState::Running;
        true
    }

    pub(crate) fn set_bytes_to_copy(&self, bytes: u64) {
        self.progress.lock().bytes_to_copy = Some(bytes);
    }

    /// Record the size unless a caller (tree copy) already summed it.
    pub(crate) fn set_bytes_to_copy_if_unknown(&self, bytes: u64) {
        self.progress.lock().bytes_to_copy.get_or_insert(bytes);
    }

    pub(crate) fn add_bytes_copied(&self, bytes: u64) {
        self.progress.lock().bytes_copied += bytes;
    }

    /// Running → Done or Failed, then wake every waiter.
    pub(crate) fn finish(&self, result: VfsResult<()>) {
        {
            let mut progress = self.progress.lock();
            if progress.state.is_terminal() {
                return;
            }
            match result {
                Ok(()) => progress.state = CopyState::Done,
                Err(error) => {
                    progress.state = CopyState::Failed;
                    progress.error = Some(Arc::new(error));
                }
            }
        }
        self.terminal.send_replace(true);
    }

    /// Suspend until the unit is terminal or `timeout` elapses.
    pub(crate) async fn wait_terminal(&self, timeout: Option<Duration>) {
        let mut rx = self.terminal.subscribe();
        let done = rx.wait_for(|terminal| *terminal);
        match timeout {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, done).await;
            }
            None => {
                let _ = done.await;
            }
        }
    }
}

/// Per-filesystem registry of copies plus the ID counter.
#[derive(Debug)]
pub(crate) struct CopyTable {
    filesystem: FileSystemId,
    next_sequence: u64,
    units: BTreeMap<CopyId, Arc<CopyUnit>>,
}

impl CopyTable {
    pub(crate) fn new(filesystem: FileSystemId) -> Self {
        Self {
            filesystem,
            next_sequence: 1,
            units: BTreeMap::new(),
        }
    }

    pub(crate) fn next_id(&mut self) -> CopyId {
        let id = CopyId::new(self.filesystem, self.next_sequence);
        self.next_sequence += 1;
        id
    }

    pub(crate) fn insert(&mut self, unit: Arc<CopyUnit>) {
        self.units.insert(unit.id(), unit);
    }

    pub(crate) fn get(&self, id: CopyId) -> VfsResult<Arc<CopyUnit>> {
        self.units
            .get(&id)
            .cloned()
            .ok_or_else(|| VfsError::no_such_copy(id))
    }

    pub(crate) fn remove(&mut self, id: CopyId) -> Option<Arc<CopyUnit>> {
        self.units.remove(&id)
    }

    pub(crate) fn ids(&self) -> Vec<CopyId> {
        self.units.keys().copied().collect()
    }

    pub(crate) fn units(&self) -> Vec<Arc<CopyUnit>> {
        self.units.values().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.units.clear();
    }
}
