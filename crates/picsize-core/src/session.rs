use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use tracing::debug;

use crate::error::SessionError;
use crate::record::HarvestBatch;

/// State shared by every command of one interactive session: the selected
/// folder, the batch last harvested from it, and whether a background run
/// is in flight.
#[derive(Debug, Default)]
pub struct Session {
    folder: Option<PathBuf>,
    batch: Option<Arc<HarvestBatch>>,
    busy: Arc<AtomicBool>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch folders. The previous batch no longer describes the folder and
    /// is dropped.
    pub fn select_folder(&mut self, dir: impl Into<PathBuf>) {
        self.folder = Some(dir.into());
        self.batch = None;
    }

    /// Replace the current batch wholesale.
    pub fn publish(&mut self, batch: HarvestBatch) -> Arc<HarvestBatch> {
        let batch = Arc::new(batch);
        self.batch = Some(Arc::clone(&batch));
        batch
    }

    /// Folder and batch for a command that needs both.
    pub fn current(&self) -> Result<(&Path, Arc<HarvestBatch>), SessionError> {
        let folder = self.folder.as_deref().ok_or(SessionError::NoFolder)?;
        let batch = self.batch.clone().ok_or(SessionError::NoBatch)?;
        Ok((folder, batch))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run `job` on a background thread unless another run is in flight.
    ///
    /// The busy flag is released when `job` finishes, including by panic.
    pub fn spawn<T, F>(&self, job: F) -> Result<RunHandle<T>, SessionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let guard = RunGuard(Arc::clone(&self.busy));
        debug!("background run started");
        let handle = std::thread::spawn(move || {
            let _guard = guard;
            job()
        });
        Ok(RunHandle { handle })
    }
}

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A background run started by [`Session::spawn`].
pub struct RunHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> RunHandle<T> {
    /// Wait for the run. A panic inside it comes back as an error.
    pub fn join(self) -> anyhow::Result<T> {
        self.handle
            .join()
            .map_err(|_| anyhow!("background run panicked"))
    }
}
