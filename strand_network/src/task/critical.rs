use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// How a task failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Error(String),
    Panic(String),
}

/// Details of a task that ended with an error or a panic
#[derive(Clone, Debug)]
pub struct TaskFailure {
    pub id: u64,
    pub task: String,
    pub kind: FailureKind,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Error(e) => write!(f, "task {}#{} failed: {}", self.task, self.id, e),
            FailureKind::Panic(p) => write!(f, "task {}#{} panicked: {}", self.task, self.id, p),
        }
    }
}

type Handler = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

static HANDLER: RwLock<Option<Handler>> = parking_lot::const_rwlock(None);

/// Install the process-wide handler for task failures, replacing any previous one.
pub fn set_critical_handler(handler: impl Fn(&TaskFailure) + Send + Sync + 'static) {
    *HANDLER.write() = Some(Arc::new(handler));
}

/// Go back to logging task failures
pub fn clear_critical_handler() {
    *HANDLER.write() = None;
}

pub(crate) fn report(failure: &TaskFailure) {
    let handler = HANDLER.read().clone();
    match handler {
        Some(handler) => handler(failure),
        None => tracing::error!("Critical: {}", failure),
    }
}
