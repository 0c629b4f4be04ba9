//! Worker pool and status bookkeeping for one filesystem.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::unit::{CopyTable, CopyUnit};
use super::{CopyMode, CopyStatus};
use crate::config::{EngineConfig, StatusRetention};
use crate::error::{VfsError, VfsResult};
use crate::filesystem::{FileSystem, WeakFileSystem};
use crate::ids::{CopyId, FileSystemId};
use crate::path::VfsPath;

/// A queued unit plus the destination handle it writes through.
pub(crate) struct CopyJob {
    unit: Arc<CopyUnit>,
    target: FileSystem,
}

type JobReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<CopyJob>>>;

/// Copy engine owned by a filesystem.
///
/// The queue sender lives in an `Option` so `shutdown` can drop it: workers
/// then drain whatever is left (already cancelled) and exit.
pub(crate) struct CopyEngine {
    config: EngineConfig,
    table: Mutex<CopyTable>,
    queue: Mutex<Option<mpsc::UnboundedSender<CopyJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CopyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyEngine")
            .field("config", &self.config)
            .field("copies", &self.table.lock().ids().len())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl CopyEngine {
    pub(crate) fn new(
        filesystem: FileSystemId,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CopyJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            table: Mutex::new(CopyTable::new(filesystem)),
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(Vec::new()),
        };
        (engine, rx)
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the worker tasks. They hold the filesystem weakly, so dropping
    /// the last handle closes the queue and lets them exit.
    pub(crate) fn spawn_workers(
        &self,
        runtime: &Handle,
        filesystem: WeakFileSystem,
        rx: mpsc::UnboundedReceiver<CopyJob>,
    ) {
        let rx: JobReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = self.workers.lock();
        for index in 0..self.config.workers {
            workers.push(runtime.spawn(run_worker(index, filesystem.clone(), Arc::clone(&rx))));
        }
    }

    /// Register a unit and queue it.
    pub(crate) fn submit(
        &self,
        source: &VfsPath,
        target: &FileSystem,
        destination: &VfsPath,
        mode: CopyMode,
        recursive: bool,
    ) -> VfsResult<CopyId> {
        // Held across registration so shutdown cannot interleave
        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(VfsError::not_connected("copy engine is shut down"));
        };

        let unit = {
            let mut table = self.table.lock();
            let unit = Arc::new(CopyUnit::new(
                table.next_id(),
                source.clone(),
                target.id(),
                destination.clone(),
                mode,
                recursive,
            ));
            table.insert(Arc::clone(&unit));
            unit
        };
        let id = unit.id();

        let job = CopyJob {
            unit,
            target: target.clone(),
        };
        if sender.send(job).is_err() {
            self.table.lock().remove(id);
            return Err(VfsError::not_connected("copy workers have stopped"));
        }
        tracing::debug!("queued {id}: {source} → {destination} ({mode})");
        Ok(id)
    }

    fn unit(&self, id: CopyId) -> VfsResult<Arc<CopyUnit>> {
        self.table.lock().get(id)
    }

    /// Snapshot `unit`, evicting it if the retention policy says so.
    fn observe(&self, unit: &CopyUnit) -> CopyStatus {
        let status = unit.status();
        if status.is_done() && self.config.status_retention == StatusRetention::ConsumeOnRead {
            self.table.lock().remove(status.id);
        }
        status
    }

    pub(crate) fn status(&self, id: CopyId) -> VfsResult<CopyStatus> {
        let unit = self.unit(id)?;
        Ok(self.observe(&unit))
    }

    #[tracing::instrument(skip(self), name = "copy.cancel")]
    pub(crate) async fn cancel(&self, id: CopyId) -> VfsResult<CopyStatus> {
        let unit = self.unit(id)?;
        unit.request_cancel();
        unit.wait_terminal(None).await;
        Ok(self.observe(&unit))
    }

    pub(crate) async fn wait(&self, id: CopyId, timeout: Option<Duration>) -> VfsResult<CopyStatus> {
        let unit = self.unit(id)?;
        unit.wait_terminal(timeout).await;
        Ok(self.observe(&unit))
    }

    pub(crate) fn clear(&self, id: CopyId) -> VfsResult<CopyStatus> {
        let mut table = self.table.lock();
        let unit = table.get(id)?;
        if !unit.is_terminal() {
            return Err(VfsError::unsupported(format!(
                "{id} is still active; cancel it first"
            )));
        }
        table.remove(id);
        Ok(unit.status())
    }

    pub(crate) fn ids(&self) -> Vec<CopyId> {
        self.table.lock().ids()
    }

    /// Stop accepting work, cancel every unit, wait for each to settle, and
    /// join the workers.
    #[tracing::instrument(skip(self), name = "copy.shutdown")]
    pub(crate) async fn shutdown(&self) {
        drop(self.queue.lock().take());

        let units = self.table.lock().units();
        for unit in &units {
            unit.request_cancel();
        }
        for unit in &units {
            unit.wait_terminal(None).await;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("copy worker ended abnormally: {e}");
            }
        }

        self.table.lock().clear();
        tracing::debug!("{} copies accounted for", units.len());
    }
}

/// Pull jobs until the queue closes. Workers share one receiver, so with a
/// single worker units run strictly in submission order.
async fn run_worker(index: usize, filesystem: WeakFileSystem, rx: JobReceiver) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        let Some(source) = filesystem.upgrade() else {
            job.unit
                .finish(Err(VfsError::not_connected("filesystem dropped")));
            break;
        };
        execute(&source, job).await;
    }
    tracing::debug!("copy worker {index} stopped");
}

#[tracing::instrument(skip_all, fields(copy = %job.unit.id()), name = "copy.execute")]
async fn execute(source: &FileSystem, job: CopyJob) {
    let CopyJob { unit, target } = job;
    if !unit.start() {
        tracing::debug!("already finished before start, skipping");
        return;
    }
    tracing::info!(
        "{}:{} → {}:{} ({})",
        source.location(),
        unit.source(),
        target.location(),
        unit.destination(),
        unit.mode()
    );
    debug_assert_eq!(unit.destination_fs(), target.id());

    let result = match AssertUnwindSafe(source.copy_unit(&target, &unit))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => Err(VfsError::other(format!("{} panicked", unit.id()))),
    };

    let status = unit.status();
    match &result {
        Ok(()) => tracing::info!("done, {} bytes", status.bytes_copied),
        Err(e) if e.is_cancellation() => {
            tracing::info!("cancelled after {} bytes", status.bytes_copied)
        }
        Err(e) => tracing::warn!("failed after {} bytes: {e}", status.bytes_copied),
    }
    unit.finish(result);
}
