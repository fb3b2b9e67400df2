use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{BackendError, RegistryError};
use crate::voice::Voice;
use crate::Backend;

/// Lifecycle of a single backend worker.
///
/// `Uninitialized -> Ready -> Started <-> Stopped -> Freed`. Borrowing is
/// independent of this state: a stopped worker can still be borrowed, its
/// synthesis calls are expected to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Ready,
    Started,
    Stopped,
    Freed,
}

struct WorkerInner {
    backend: Box<dyn Backend>,
    state: WorkerState,
}

/// One initialized backend instance serving a single model.
pub struct Worker {
    engine_id: String,
    model_id: String,
    index: usize,
    inner: Mutex<WorkerInner>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("engine_id", &self.engine_id)
            .field("model_id", &self.model_id)
            .field("index", &self.index)
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    /// Wrap `backend` and run its initialization.
    fn initialize(
        engine_id: &str,
        model_id: &str,
        index: usize,
        backend: Box<dyn Backend>,
    ) -> Result<Self, BackendError> {
        let worker = Self {
            engine_id: engine_id.to_string(),
            model_id: model_id.to_string(),
            index,
            inner: Mutex::new(WorkerInner {
                backend,
                state: WorkerState::Uninitialized,
            }),
        };

        {
            let mut inner = worker.inner.lock();
            inner.backend.initialize()?;
            inner.state = WorkerState::Ready;
        }

        Ok(worker)
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Start the backend for this worker's model. A started worker is left
    /// alone; the state is left as it was when the backend refuses.
    pub(crate) fn start(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        match inner.state {
            WorkerState::Freed => return Err(BackendError::WorkerFreed),
            WorkerState::Started => return Ok(()),
            _ => {}
        }
        inner.backend.start(&self.model_id)?;
        inner.state = WorkerState::Started;
        Ok(())
    }

    /// Stop a started worker. Workers that never started are left alone.
    pub(crate) fn stop(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        match inner.state {
            WorkerState::Freed => return Err(BackendError::WorkerFreed),
            WorkerState::Started => {}
            _ => return Ok(()),
        }
        inner.backend.stop(&self.model_id)?;
        inner.state = WorkerState::Stopped;
        Ok(())
    }

    /// Stop if running and mark the worker as freed. Terminal.
    pub(crate) fn free(&self) {
        let mut inner = self.inner.lock();
        if inner.state == WorkerState::Started {
            if let Err(e) = inner.backend.stop(&self.model_id) {
                log::warn!(
                    "Stopping {}:{} worker #{} on shutdown failed: {e}",
                    self.engine_id,
                    self.model_id,
                    self.index
                );
            }
        }
        inner.state = WorkerState::Freed;
    }

    pub(crate) fn list_voices(&self) -> Result<Vec<Voice>, BackendError> {
        let inner = self.inner.lock();
        if inner.state == WorkerState::Freed {
            return Err(BackendError::WorkerFreed);
        }
        inner.backend.list_voices(&self.model_id)
    }

    /// Run the backend's synthesis. The bytes are passed through untouched.
    pub fn synthesize(&self, voice: &Voice, text: &str) -> Result<Vec<u8>, BackendError> {
        let mut inner = self.inner.lock();
        if inner.state == WorkerState::Freed {
            return Err(BackendError::WorkerFreed);
        }
        inner.backend.synthesize(voice, text)
    }
}

/// Fixed set of workers for one `(engine, model)` pair.
///
/// The bounded channel holds the idle workers and is the only record of
/// pool membership: borrowing receives from it, releasing sends back.
/// Workers are only reachable through a borrow:
///
/// ```compile_fail
/// fn bypass(pool: &voicecast::engines::WorkerPool) {
///     let _ = pool.workers();
/// }
/// ```
pub struct WorkerPool {
    engine_id: String,
    model_id: String,
    workers: Vec<Arc<Worker>>,
    idle_tx: Sender<Arc<Worker>>,
    idle_rx: Receiver<Arc<Worker>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("engine_id", &self.engine_id)
            .field("model_id", &self.model_id)
            .field("capacity", &self.capacity())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl WorkerPool {
    /// Create and initialize `count` workers from `factory`.
    ///
    /// Fails on the first worker whose initialization fails; workers created
    /// before it are dropped.
    pub fn build(
        engine_id: &str,
        model_id: &str,
        count: usize,
        factory: &dyn Fn() -> Box<dyn Backend>,
    ) -> Result<Self, RegistryError> {
        if count == 0 {
            return Err(RegistryError::NoInstances {
                engine: engine_id.to_string(),
                model: model_id.to_string(),
            });
        }

        let (idle_tx, idle_rx) = crossbeam_channel::bounded(count);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let worker = Worker::initialize(engine_id, model_id, index, factory())?;
            workers.push(Arc::new(worker));
        }
        for worker in &workers {
            // Capacity equals worker count, so this never blocks.
            let _ = idle_tx.send(Arc::clone(worker));
        }

        Ok(Self {
            engine_id: engine_id.to_string(),
            model_id: model_id.to_string(),
            workers,
            idle_tx,
            idle_rx,
        })
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle_rx.len()
    }

    /// Every worker, borrowed or not.
    pub(crate) fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Block until a worker is idle.
    ///
    /// The pool holds its own sender, so the wait only ends with `None` if
    /// the channel is torn down underneath it.
    pub fn borrow(&self) -> Option<PooledWorker> {
        let worker = match self.idle_rx.try_recv() {
            Ok(worker) => worker,
            Err(TryRecvError::Empty) => {
                log::debug!(
                    "All {} workers of {}:{} busy, waiting",
                    self.capacity(),
                    self.engine_id,
                    self.model_id
                );
                self.idle_rx.recv().ok()?
            }
            Err(TryRecvError::Disconnected) => return None,
        };
        Some(self.guard(worker))
    }

    /// Take an idle worker without waiting.
    pub fn try_borrow(&self) -> Option<PooledWorker> {
        self.idle_rx.try_recv().ok().map(|w| self.guard(w))
    }

    /// Wait at most `timeout` for an idle worker. An expired wait takes
    /// nothing from the pool.
    pub fn borrow_timeout(&self, timeout: Duration) -> Option<PooledWorker> {
        self.idle_rx.recv_timeout(timeout).ok().map(|w| self.guard(w))
    }

    fn guard(&self, worker: Arc<Worker>) -> PooledWorker {
        PooledWorker {
            worker,
            idle_tx: self.idle_tx.clone(),
        }
    }

    pub(crate) fn start_all(&self) {
        for worker in &self.workers {
            if let Err(e) = worker.start() {
                log::warn!(
                    "Failed to start {}:{} worker #{}: {e}",
                    self.engine_id,
                    self.model_id,
                    worker.index
                );
            }
        }
    }

    pub(crate) fn stop_all(&self) {
        for worker in &self.workers {
            if let Err(e) = worker.stop() {
                log::warn!(
                    "Failed to stop {}:{} worker #{}: {e}",
                    self.engine_id,
                    self.model_id,
                    worker.index
                );
            }
        }
    }

    pub(crate) fn free_all(&self) {
        for worker in &self.workers {
            worker.free();
        }
    }
}

/// Exclusive use of a worker until dropped, at which point it goes back to
/// the pool it was borrowed from.
pub struct PooledWorker {
    worker: Arc<Worker>,
    idle_tx: Sender<Arc<Worker>>,
}

impl fmt::Debug for PooledWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledWorker").field(&self.worker).finish()
    }
}

impl PooledWorker {
    /// Return the worker to its pool. Same as dropping the guard.
    pub fn release(self) {}
}

impl std::ops::Deref for PooledWorker {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        // Fails only when the pool itself is gone (engine unregistered).
        let _ = self.idle_tx.send(Arc::clone(&self.worker));
    }
}
