use std::io;
use thiserror::Error;

/// An error raised by a [`Socket`](crate::Socket) operation.
///
/// I/O errors which don't map to one of the specific transport conditions are
/// kept as their display string so that the error can be cloned and handed to
/// every request that was waiting on the same connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SocketError {
    #[error("End of stream")]
    Eof,
    #[error("Operation timed out")]
    Timeout,
    #[error("Operation canceled")]
    Canceled,
    #[error("Socket not connected")]
    NotConnected,
    #[error("Connection reset by peer")]
    Reset,
    #[error("I/O error: {0}")]
    Io(String),
}

impl SocketError {
    /// Whether this error describes the state of the transport, as opposed to a
    /// failure of the local machinery. Callers may retry these on a fresh
    /// connection.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::Eof,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::NotConnected => Self::NotConnected,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Reset,
            _ => Self::Io(e.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for SocketError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// An error observed by a task at one of its suspension points.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task interrupted")]
    Interrupted,
    #[error("Task pool is shutting down")]
    Shutdown,
    #[error("Task failed: {0}")]
    Failed(String),
}

/// Report a broken internal invariant.
///
/// Builds with the `debug` feature treat this as fatal; otherwise the
/// violation is logged and the caller carries on.
#[track_caller]
pub fn invariant_violation(what: &str) {
    let location = std::panic::Location::caller();
    tracing::error!("Invariant violation at {}: {}", location, what);

    if cfg!(feature = "debug") {
        panic!("Invariant violation: {}", what);
    }
}
