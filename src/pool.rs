use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::engine::{EngineFactory, ScanEngine};
use crate::error::EngineError;

/// Identity of the worker an engine handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Shared reference to one pooled engine.
///
/// Cloning is cheap and yields the same engine; `lock` serializes scans on it.
#[derive(Clone)]
pub struct EngineHandle {
    worker: WorkerId,
    engine: Arc<AsyncMutex<Box<dyn ScanEngine>>>,
}

impl EngineHandle {
    fn new(worker: WorkerId, engine: Box<dyn ScanEngine>) -> Self {
        Self {
            worker,
            engine: Arc::new(AsyncMutex::new(engine)),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Box<dyn ScanEngine>> {
        self.engine.lock().await
    }

    /// True when both handles point at the same engine instance.
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

/// Lazily built engine handles, one per worker.
///
/// The lock covers only the lookup and insert; scans run on the returned
/// handle after it is released.
pub struct EnginePool {
    factory: Box<dyn EngineFactory>,
    handles: Mutex<HashMap<WorkerId, EngineHandle>>,
}

impl EnginePool {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `worker`, building one on first use.
    pub fn acquire(&self, worker: WorkerId) -> Result<EngineHandle, EngineError> {
        let mut handles = self.handles();
        if let Some(handle) = handles.get(&worker) {
            return Ok(handle.clone());
        }
        let handle = EngineHandle::new(worker, self.factory.create()?);
        tracing::debug!(%worker, "created scan engine handle");
        handles.insert(worker, handle.clone());
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pooled handle, returning how many there were.
    pub fn drain(&self) -> usize {
        let mut handles = self.handles();
        let n = handles.len();
        handles.clear();
        n
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<WorkerId, EngineHandle>> {
        // The map stays consistent even if a holder panicked; keep serving.
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A fixed set of worker identities handed out to in-flight requests.
///
/// At most `capacity` leases exist at once and no identity is leased twice
/// concurrently, which bounds scan concurrency and keeps each pooled engine
/// with a single user.
#[derive(Clone)]
pub struct WorkerSlots {
    inner: Arc<SlotsInner>,
}

struct SlotsInner {
    capacity: usize,
    permits: Arc<Semaphore>,
    free: Mutex<Vec<WorkerId>>,
}

impl WorkerSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Reversed so the lowest id is leased first.
        let free = (0..capacity).rev().map(WorkerId).collect();
        Self {
            inner: Arc::new(SlotsInner {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                free: Mutex::new(free),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Wait for a free worker identity.
    pub async fn lease(&self) -> WorkerLease {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");
        let worker = self
            .inner
            .free_ids()
            .pop()
            .expect("a permit guarantees a free worker id");
        WorkerLease {
            worker,
            slots: self.inner.clone(),
            _permit: permit,
        }
    }
}

impl SlotsInner {
    fn free_ids(&self) -> MutexGuard<'_, Vec<WorkerId>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A worker identity held by one request; returned to the slots on drop.
pub struct WorkerLease {
    worker: WorkerId,
    slots: Arc<SlotsInner>,
    // Dropped after `drop` has pushed the id back, so a new lease always
    // finds a free id.
    _permit: OwnedSemaphorePermit,
}

impl WorkerLease {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.slots.free_ids().push(self.worker);
    }
}
