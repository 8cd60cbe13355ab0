//! HTTP/1.1 head framing shared by the inbound and outbound sides.
//!
//! Only the framing lives here: heads, status codes, content length and
//! chunked transfer coding. What goes in the content is up to the
//! resources and callers.

use thiserror::Error;

mod code;
pub use code::*;

mod head;
pub use head::*;

mod response;
pub use response::*;

mod chunked;
pub use chunked::*;

/// An error status raised by a request handler, or received from a remote.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {content}")]
pub struct HttpError {
    pub code: Code,
    pub content: String,
}

impl HttpError {
    pub fn new(code: Code, content: impl Into<String>) -> Self {
        Self {
            code,
            content: content.into(),
        }
    }

    pub fn bad_request(content: impl Into<String>) -> Self {
        Self::new(Code::BAD_REQUEST, content)
    }

    pub fn not_found(content: impl Into<String>) -> Self {
        Self::new(Code::NOT_FOUND, content)
    }

    pub fn internal(content: impl Into<String>) -> Self {
        Self::new(Code::INTERNAL_SERVER_ERROR, content)
    }
}

/// A byte stream that doesn't frame as HTTP
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("Malformed head: {0}")]
    Malformed(String),
    #[error("Invalid content length")]
    ContentLength,
    #[error("Head larger than {0} bytes")]
    HeadTooLarge(usize),
    #[error("Content larger than {0} bytes")]
    ContentTooLarge(usize),
    #[error("Malformed chunk: {0}")]
    Chunk(&'static str),
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl From<FramingError> for HttpError {
    fn from(e: FramingError) -> Self {
        let code = match e {
            FramingError::HeadTooLarge(_) => Code::REQUEST_HEADER_FIELDS_TOO_LARGE,
            FramingError::ContentTooLarge(_) => Code::PAYLOAD_TOO_LARGE,
            FramingError::Unsupported(_) => Code::NOT_IMPLEMENTED,
            _ => Code::BAD_REQUEST,
        };
        Self::new(code, e.to_string())
    }
}

/// Find the end of a head in `buf`, returning the offset just past the blank
/// line that terminates it.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}
