use strand_network::{
    http::{FramingError, HttpError},
    SocketError,
};
use thiserror::Error;

/// Why an outbound request didn't produce a response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The connection carrying the request went away, or was reset because
    /// another request on it was canceled. Retrying on a new connection is
    /// up to the caller.
    #[error("Connection reset")]
    ConnectionReset,
    #[error("Request canceled")]
    Canceled,
    #[error("Request timed out")]
    Timeout,
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Remote returned {0}")]
    Http(#[from] HttpError),
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid remote address: {0}")]
    InvalidHost(String),
    #[error("Shutting down")]
    Shutdown,
    #[error("Request was never submitted")]
    NotSubmitted,
}

impl RemoteError {
    /// Whether this describes the transport rather than the remote's answer
    pub fn is_transport(&self) -> bool {
        match self {
            Self::ConnectionReset | Self::Canceled | Self::Timeout | Self::Unavailable(_) => true,
            Self::Socket(e) => e.is_transport(),
            _ => false,
        }
    }
}

impl From<FramingError> for RemoteError {
    fn from(e: FramingError) -> Self {
        Self::Protocol(e.to_string())
    }
}
