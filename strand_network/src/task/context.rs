use crate::TaskError;

use std::{future::Future, sync::Arc, time::Duration};
use tokio::{select, sync::watch};

/// A running task's view of itself, passed to every task function.
///
/// The suspension helpers here fail with [`TaskError::Interrupted`] once
/// either the task's own handle or its pool has been interrupted.
#[derive(Clone, Debug)]
pub struct TaskContext {
    id: u64,
    name: Arc<str>,
    own_interrupt: watch::Receiver<bool>,
    pool_interrupt: Option<watch::Receiver<bool>>,
}

async fn wait_for_true(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // The flag can no longer change
            std::future::pending::<()>().await;
        }
    }
}

impl TaskContext {
    pub(crate) fn new(
        id: u64,
        name: Arc<str>,
        own_interrupt: watch::Receiver<bool>,
        pool_interrupt: Option<watch::Receiver<bool>>,
    ) -> Self {
        Self {
            id,
            name,
            own_interrupt,
            pool_interrupt,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interrupted(&self) -> bool {
        *self.own_interrupt.borrow() || self.pool_interrupt.as_ref().map_or(false, |p| *p.borrow())
    }

    /// Fail with [`TaskError::Interrupted`] if an interrupt is pending.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.interrupted() {
            Err(TaskError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolves when the task is interrupted
    pub async fn interruption(&self) {
        let own = wait_for_true(self.own_interrupt.clone());
        match &self.pool_interrupt {
            Some(pool) => {
                select! {
                    _ = own => (),
                    _ = wait_for_true(pool.clone()) => (),
                }
            }
            None => own.await,
        }
    }

    /// Suspend until `fut` completes, or fail if the task is interrupted first.
    pub async fn suspend_until<F: Future>(&self, fut: F) -> Result<F::Output, TaskError> {
        self.check()?;
        select! {
            biased;
            _ = self.interruption() => Err(TaskError::Interrupted),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        self.suspend_until(tokio::time::sleep(duration)).await
    }

    /// Give other ready tasks a turn.
    pub async fn yield_now(&self) -> Result<(), TaskError> {
        tokio::task::yield_now().await;
        self.check()
    }
}
