use strand_network::{http::HttpError, SocketError, TaskError};
use thiserror::Error;
use serde::{Serialize,Deserialize};

/// An error that might occur when configuring a listener.
#[derive(Error,Debug,Clone,Serialize,Deserialize)]
pub enum ListenerError
{
    #[error("I/O Error: {0}")]
    IoError(String),
    #[error("Listener is shutting down")]
    Shutdown,
}

impl From<std::io::Error> for ListenerError
{
    fn from(e: std::io::Error) -> Self
    {
        Self::IoError(e.to_string())
    }
}

/// An error that ends one pass of serving a client.
///
/// HTTP errors are answered on the connection where possible; everything
/// else closes it.
#[derive(Error,Debug)]
pub enum ServeError
{
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ServeError
{
    /// Whether this is the ordinary noise of a connection going away
    pub fn is_quiet(&self) -> bool
    {
        matches!(self,
            Self::Socket(SocketError::Canceled)
            | Self::Socket(SocketError::NotConnected)
            | Self::Socket(SocketError::Eof)
            | Self::Socket(SocketError::Reset)
            | Self::Socket(SocketError::Timeout)
            | Self::Task(TaskError::Interrupted)
            | Self::Task(TaskError::Shutdown)
        )
    }
}
