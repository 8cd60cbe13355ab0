use super::{launch, TaskContext, TaskHandle};
use crate::TaskError;

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// A bounded set of concurrently running tasks.
///
/// At most [`size`](Self::size) tasks run at once; further submissions
/// suspend the submitter until a running task finishes.
#[derive(Clone, Debug)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    name: Arc<str>,
    permits: Arc<Semaphore>,
    capacity: AtomicUsize,
    interrupt: watch::Sender<bool>,
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Held by each running pool task
struct Active {
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Active {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held by each submitter waiting for capacity
struct Queued<'a>(&'a PoolInner);

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TaskPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            inner: Arc::new(PoolInner {
                name: Arc::from(name.into()),
                permits: Arc::new(Semaphore::new(size)),
                capacity: AtomicUsize::new(size),
                interrupt,
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Grow the pool by `n` slots
    pub fn add(&self, n: usize) {
        self.inner.capacity.fetch_add(n, Ordering::AcqRel);
        self.inner.permits.add_permits(n);
    }

    pub fn size(&self) -> usize {
        self.inner.capacity.load(Ordering::Acquire)
    }

    /// Number of tasks currently running
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Number of submitters waiting for a free slot
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    pub fn is_interrupted(&self) -> bool {
        *self.inner.interrupt.borrow()
    }

    /// Interrupt every task in the pool and refuse further submissions.
    pub fn interrupt(&self) {
        tracing::debug!("pool {}: interrupting {} tasks", self.inner.name, self.active());
        self.inner.interrupt.send_modify(|flag| *flag = true);
        self.inner.permits.close();
    }

    /// Run `f` in the pool, waiting for a free slot first.
    pub async fn submit<F, Fut>(&self, f: F) -> Result<TaskHandle, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_interrupted() {
            return Err(TaskError::Shutdown);
        }

        self.inner.queued.fetch_add(1, Ordering::AcqRel);
        let waiting = Queued(&self.inner);
        let permit = Arc::clone(&self.inner.permits).acquire_owned().await;
        drop(waiting);

        let permit = permit.map_err(|_| TaskError::Shutdown)?;
        Ok(self.start(permit, f))
    }

    /// Run `f` in the pool if a slot is free right now.
    pub fn try_submit<F, Fut>(&self, f: F) -> Result<Option<TaskHandle>, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => Ok(Some(self.start(permit, f))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(TaskError::Shutdown),
        }
    }

    fn start<F, Fut>(&self, permit: OwnedSemaphorePermit, f: F) -> TaskHandle
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        let active = Active {
            pool: Arc::clone(&self.inner),
            _permit: permit,
        };
        launch(
            Arc::clone(&self.inner.name),
            Some(self.inner.interrupt.subscribe()),
            active,
            f,
        )
    }
}
