//! Cooperative task substrate.
//!
//! Tasks are tokio tasks which carry a name, a [`TaskContext`] through which
//! they observe interruption, and failure reporting: a task function that
//! returns an error or panics is handed to the process-wide critical handler
//! rather than being dropped on the floor.

use crate::TaskError;

use futures::FutureExt;
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{sync::watch, task::JoinHandle};

mod context;
pub use context::*;

mod pool;
pub use pool::*;

mod critical;
pub use critical::*;

mod concurrent;
pub use concurrent::*;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A handle to a running task
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
    interrupt: watch::Sender<bool>,
    join: JoinHandle<Result<(), TaskError>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop. Its next suspension point through
    /// [`TaskContext`] fails with [`TaskError::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupt.send_modify(|flag| *flag = true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to finish.
    ///
    /// Failures have already been reported by the time this returns; the
    /// error is only informational.
    pub async fn join(self) -> Result<(), TaskError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TaskError::Shutdown),
            Err(e) => Err(TaskError::Failed(e.to_string())),
        }
    }
}

/// Run `f` as a task outside of any pool.
pub fn spawn<F, Fut>(name: impl Into<String>, f: F) -> TaskHandle
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    launch(Arc::from(name.into()), None, (), f)
}

/// Start a task. `guard` lives exactly as long as the task body.
pub(crate) fn launch<F, Fut, G>(
    name: Arc<str>,
    pool_interrupt: Option<watch::Receiver<bool>>,
    guard: G,
    f: F,
) -> TaskHandle
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    G: Send + 'static,
{
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let (interrupt, own_interrupt) = watch::channel(false);
    let ctx = TaskContext::new(id, Arc::clone(&name), own_interrupt, pool_interrupt);
    let body = f(ctx);

    let task_name = Arc::clone(&name);
    let join = tokio::spawn(async move {
        let _guard = guard;
        let result = AssertUnwindSafe(body).catch_unwind().await;
        settle(id, &task_name, result)
    });

    TaskHandle {
        id,
        name,
        interrupt,
        join,
    }
}

fn settle(
    id: u64,
    name: &str,
    result: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) -> Result<(), TaskError> {
    let kind = match result {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => {
            if let Some(stopped) = e.downcast_ref::<TaskError>() {
                tracing::debug!("task {}#{} stopped: {}", name, id, stopped);
                return Err(stopped.clone());
            }
            FailureKind::Error(format!("{:#}", e))
        }
        Err(payload) => FailureKind::Panic(panic_message(payload.as_ref())),
    };

    let failure = TaskFailure {
        id,
        task: name.to_string(),
        kind,
    };
    critical::report(&failure);
    Err(TaskError::Failed(failure.to_string()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn failures_reach_critical_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_critical_handler(move |failure| {
            if failure.task == "critical-test" {
                sink.lock().push(failure.kind.clone());
            }
        });

        let failed = spawn("critical-test", |_ctx| async {
            Err(anyhow::anyhow!("storage unavailable"))
        });
        assert!(matches!(failed.join().await, Err(TaskError::Failed(_))));

        let panicked = spawn("critical-test", |_ctx| async {
            let state: Option<u32> = None;
            state.expect("bad state");
            Ok(())
        });
        assert!(matches!(panicked.join().await, Err(TaskError::Failed(_))));

        let interrupted = spawn("critical-test", |ctx| async move {
            ctx.suspend_until(std::future::pending::<()>()).await?;
            Ok(())
        });
        interrupted.interrupt();
        assert_eq!(interrupted.join().await, Err(TaskError::Interrupted));

        clear_critical_handler();

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                FailureKind::Error("storage unavailable".to_string()),
                FailureKind::Panic("bad state".to_string()),
            ]
        );
    }
}
