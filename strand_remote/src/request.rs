use crate::{tag::TagHandle, HostPort, RemoteError, TagState};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::{fmt, time::Duration};
use strand_network::{
    http::{build_request_head, Code, ResponseHead},
    invariant_violation,
};
use tokio::sync::oneshot;

/// Called with the size of the latest piece transferred and the running total
pub type Progress = Box<dyn FnMut(usize, usize) + Send>;

/// What gets sent
pub struct Out {
    pub head: Bytes,
    pub content: Bytes,
    pub progress: Option<Progress>,
}

impl Out {
    pub fn new(head: impl Into<Bytes>, content: impl Into<Bytes>) -> Self {
        Self {
            head: head.into(),
            content: content.into(),
            progress: None,
        }
    }

    /// Build an HTTP/1.1 request to `target`
    pub fn request(
        method: &str,
        target: &HostPort,
        path: &str,
        headers: &[(String, String)],
        content: impl Into<Bytes>,
    ) -> Self {
        let content = content.into();
        let head = build_request_head(method, &target.to_string(), path, headers, content.len());
        Self::new(head, content)
    }

    pub fn with_progress(mut self, progress: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}

/// How the response content is stored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InContent {
    /// Allocated to fit, up to [`Opts::content_length_maxalloc`]
    Dynamic,
    /// At most this many bytes
    Fixed(usize),
}

/// What to expect back
pub struct In {
    /// Largest acceptable response head; zero takes the configured default
    pub head_max: usize,
    pub content: InContent,
    pub progress: Option<Progress>,
}

impl Default for In {
    fn default() -> Self {
        Self {
            head_max: 0,
            content: InContent::Dynamic,
            progress: None,
        }
    }
}

impl In {
    pub fn fixed(cap: usize) -> Self {
        Self {
            content: InContent::Fixed(cap),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}

/// Per-request policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opts {
    /// Report a non-success status as [`RemoteError::Http`] instead of
    /// returning the response
    pub http_exceptions: bool,
    /// Largest dynamically allocated response content. A remote declaring
    /// more is a protocol error.
    pub content_length_maxalloc: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            http_exceptions: true,
            content_length_maxalloc: crate::config::DEFAULT_CONTENT_LENGTH_MAXALLOC,
        }
    }
}

/// A remote's answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub head: ResponseHead,
    pub content: Bytes,
}

impl Response {
    pub fn code(&self) -> Code {
        self.head.code
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_slice(&self.content).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

/// One logical request to a remote.
///
/// Build it, hand it to [`Remote::submit`](crate::Remote::submit), then wait
/// for the [`response`](Self::response). Dropping a request that hasn't
/// completed cancels it.
pub struct Request {
    target: HostPort,
    pub(crate) out: Option<Out>,
    pub(crate) input: Option<In>,
    pub(crate) opts: Opts,
    pub(crate) tag: Option<TagHandle>,
    pub(crate) result: Option<oneshot::Receiver<Result<Response, RemoteError>>>,
    submitted: bool,
    canceled: bool,
}

impl Request {
    pub fn new(target: HostPort, out: Out) -> Self {
        Self {
            target,
            out: Some(out),
            input: Some(In::default()),
            opts: Opts::default(),
            tag: None,
            result: None,
            submitted: false,
            canceled: false,
        }
    }

    /// A `GET` with no content
    pub fn get(target: HostPort, path: &str) -> Self {
        let out = Out::request("GET", &target, path, &[], Bytes::new());
        Self::new(target, out)
    }

    pub fn with_in(mut self, input: In) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_opts(mut self, opts: Opts) -> Self {
        self.opts = opts;
        self
    }

    pub fn target(&self) -> &HostPort {
        &self.target
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.submitted = true;
    }

    /// The tag's state, or `None` once it's retired or if never submitted
    pub fn state(&self) -> Option<TagState> {
        self.tag.as_ref().and_then(TagHandle::state)
    }

    /// Wait for the outcome
    pub async fn response(&mut self) -> Result<Response, RemoteError> {
        let result = self.result.take().ok_or(RemoteError::NotSubmitted)?;
        let outcome = result.await.unwrap_or(Err(RemoteError::Shutdown));
        self.tag = None;
        outcome
    }

    /// Wait for the outcome for at most `timeout`; past that, the request is
    /// canceled and [`RemoteError::Timeout`] returned.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Response, RemoteError> {
        let result = self.result.as_mut().ok_or(RemoteError::NotSubmitted)?;

        let outcome = match tokio::time::timeout(timeout, result).await {
            Ok(outcome) => outcome.unwrap_or(Err(RemoteError::Shutdown)),
            Err(_) => {
                if self.cancel() {
                    Err(RemoteError::Timeout)
                } else {
                    // Completed as the deadline passed
                    match self.result.as_mut().map(|r| r.try_recv()) {
                        Some(Ok(outcome)) => outcome,
                        _ => Err(RemoteError::Timeout),
                    }
                }
            }
        };

        self.result = None;
        self.tag = None;
        outcome
    }

    /// Cancel the request. Returns whether anything was actually interrupted:
    /// `false` if it had already completed.
    pub fn cancel(&mut self) -> bool {
        if self.canceled {
            invariant_violation("request canceled twice");
            return false;
        }

        match self.tag.take() {
            Some(tag) => {
                let interrupted = tag.cancel();
                self.canceled = interrupted;
                interrupted
            }
            None => false,
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(tag) = self.tag.take() {
            tag.cancel();
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("target", &self.target)
            .field("submitted", &self.submitted)
            .field("state", &self.state())
            .finish()
    }
}
