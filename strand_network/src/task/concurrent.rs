use super::{launch, TaskHandle};
use crate::{invariant_violation, TaskError};

use parking_lot::Mutex;
use std::{
    future::Future,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded fan-out over many independent items.
///
/// A fixed number of reusable worker slots is allocated up front; each
/// submitted item borrows one for the duration of its task and gives it back
/// when done. Submitting while every slot is busy suspends the submitter, so
/// memory and concurrency stay bounded whatever the batch size.
pub struct Concurrent<S> {
    name: Arc<str>,
    width: usize,
    free: Arc<Mutex<Vec<S>>>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    submitted: usize,
    running: Vec<TaskHandle>,
    /// First failure among items already reaped
    failure: Option<TaskError>,
}

/// A worker slot, lent to one item's task
pub struct Slot<S> {
    value: Option<S>,
    free: Arc<Mutex<Vec<S>>>,
    active: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl<S> Deref for Slot<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match &self.value {
            Some(v) => v,
            None => unreachable!("slot value is only taken on drop"),
        }
    }
}

impl<S> DerefMut for Slot<S> {
    fn deref_mut(&mut self) -> &mut S {
        match &mut self.value {
            Some(v) => v,
            None => unreachable!("slot value is only taken on drop"),
        }
    }
}

impl<S> Drop for Slot<S> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.free.lock().push(value);
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<S: Default + Send + 'static> Concurrent<S> {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        let width = width.max(1);
        Self {
            name: Arc::from(name.into()),
            width,
            free: Arc::new(Mutex::new((0..width).map(|_| S::default()).collect())),
            permits: Arc::new(Semaphore::new(width)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            submitted: 0,
            running: Vec::new(),
            failure: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Items running right now
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The most items that have ever run at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Start `f` on a free slot, waiting for one if necessary.
    pub async fn submit<F, Fut>(&mut self, f: F) -> Result<(), TaskError>
    where
        F: FnOnce(Slot<S>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TaskError::Shutdown)?;

        let value = match self.free.lock().pop() {
            Some(value) => value,
            None => {
                invariant_violation("fan-out permit granted with no free slot");
                S::default()
            }
        };

        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);

        let slot = Slot {
            value: Some(value),
            free: Arc::clone(&self.free),
            active: Arc::clone(&self.active),
            _permit: permit,
        };
        let body = f(slot);

        self.reap().await;
        self.running
            .push(launch(Arc::clone(&self.name), None, (), move |_ctx| body));

        self.submitted += 1;
        if self.submitted % self.width == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Join the items that have finished, keeping the first failure
    async fn reap(&mut self) {
        let (finished, running) = self
            .running
            .drain(..)
            .partition::<Vec<_>, _>(|handle| handle.is_finished());
        self.running = running;

        for handle in finished {
            if let Err(e) = handle.join().await {
                self.failure.get_or_insert(e);
            }
        }
    }

    /// Wait for everything submitted so far. Returns the first failure, if any;
    /// every failure has been reported individually.
    pub async fn wait_done(&mut self) -> Result<(), TaskError> {
        let mut result = match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        for handle in self.running.drain(..) {
            if let Err(e) = handle.join().await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_fan_out_accounts_for_every_item() {
        let results = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut fanout = Concurrent::<Vec<u64>>::new("fanout", 64);

        for item in 0..200u64 {
            let results = Arc::clone(&results);
            fanout
                .submit(move |mut scratch| async move {
                    scratch.clear();
                    scratch.push(item * 2);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    results.lock().await.extend(scratch.drain(..));
                    Ok(())
                })
                .await
                .unwrap();
            assert!(fanout.active() <= 64);
        }
        fanout.wait_done().await.unwrap();

        let mut results = results.lock().await.clone();
        results.sort_unstable();
        assert_eq!(results, (0..200u64).map(|i| i * 2).collect::<Vec<_>>());
        assert!(fanout.peak() <= 64);
        assert!(fanout.peak() > 1);
        assert_eq!(fanout.active(), 0);
    }

    #[tokio::test]
    async fn failures_surface_from_wait_done() {
        let mut fanout = Concurrent::<()>::new("failing", 2);

        fanout.submit(|_slot| async { Ok(()) }).await.unwrap();
        fanout
            .submit(|_slot| async { Err(anyhow::anyhow!("lookup failed")) })
            .await
            .unwrap();

        assert!(matches!(
            fanout.wait_done().await,
            Err(TaskError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn early_failures_are_kept() {
        let mut fanout = Concurrent::<()>::new("early", 2);

        fanout
            .submit(|_slot| async { Err(anyhow::anyhow!("lookup failed")) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Later submissions reap the failed item
        for _ in 0..4 {
            fanout.submit(|_slot| async { Ok(()) }).await.unwrap();
        }

        assert!(matches!(
            fanout.wait_done().await,
            Err(TaskError::Failed(_))
        ));
        assert_eq!(fanout.wait_done().await, Ok(()));
    }
}
