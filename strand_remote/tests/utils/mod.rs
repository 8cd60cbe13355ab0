#![allow(dead_code)]

use async_trait::async_trait;
use bytes::BytesMut;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use strand_network::{
    http::{Code, RequestHead},
    Socket,
};
use strand_remote::*;
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::timeout,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Builds the raw response to one request
pub type Handler = Arc<dyn Fn(&RequestHead, &[u8]) -> Vec<u8> + Send + Sync>;

/// A complete response with a `Content-Length`
pub fn respond(code: u16, content: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n\r\n{}",
        Code(code),
        content.len(),
        content
    )
    .into_bytes()
}

/// Answers every request with its own path, or a 404 for `/missing`
pub fn paths() -> Handler {
    Arc::new(|head, _| match head.path.as_str() {
        "/missing" => respond(404, "nope"),
        path => respond(200, path),
    })
}

/// Answers every request with the length of its content
pub fn lengths() -> Handler {
    Arc::new(|_, content| respond(200, &content.len().to_string()))
}

pub fn fixed(response: &'static [u8]) -> Handler {
    Arc::new(move |_, _| response.to_vec())
}

/// Hands out in-memory connections to a scripted server
pub struct DuplexConnector {
    handler: Handler,
    buffer: usize,
    trickle: usize,
    silent_first: usize,
    refuse: bool,
    connects: Arc<AtomicUsize>,
}

impl DuplexConnector {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            buffer: 64 * 1024,
            trickle: 0,
            silent_first: 0,
            refuse: false,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A server that accepts and never reads or answers
    pub fn silent() -> Self {
        Self::new(paths()).silent_first(usize::MAX)
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(paths())
        }
    }

    /// Capacity of each direction of a connection
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Write responses `n` bytes at a time
    pub fn trickle(mut self, n: usize) -> Self {
        self.trickle = n;
        self
    }

    /// The first `n` connections are silent
    pub fn silent_first(mut self, n: usize) -> Self {
        self.silent_first = n;
        self
    }

    /// Connection attempts so far
    pub fn connects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, target: &HostPort, _timeout: Duration) -> Result<Socket, RemoteError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(RemoteError::Unavailable(format!("{} refused", target)));
        }

        let (ours, theirs) = duplex(self.buffer);
        if n < self.silent_first {
            tokio::spawn(hold(theirs));
        } else {
            tokio::spawn(serve(theirs, Arc::clone(&self.handler), self.trickle));
        }
        Ok(Socket::with_label(ours, target.to_string()))
    }
}

async fn hold(stream: DuplexStream) {
    std::future::pending::<()>().await;
    drop(stream);
}

async fn serve(mut stream: DuplexStream, handler: Handler, trickle: usize) {
    let mut buf = BytesMut::new();

    loop {
        let head = loop {
            match RequestHead::parse(&buf[..]) {
                Ok(Some(head)) => break head,
                Ok(None) => (),
                Err(_) => return,
            }
            if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                return;
            }
        };
        let _ = buf.split_to(head.head_len);

        while buf.len() < head.content_length {
            if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                return;
            }
        }
        let content = buf.split_to(head.content_length);

        let response = handler(&head, &content);
        let piece = if trickle == 0 { response.len().max(1) } else { trickle };
        for part in response.chunks(piece) {
            if stream.write_all(part).await.is_err() {
                return;
            }
            if trickle > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        let closing = String::from_utf8_lossy(&response)
            .to_ascii_lowercase()
            .contains("connection: close");
        if closing || !head.keep_alive() {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

pub fn target() -> HostPort {
    HostPort::new("remote.test", 8448)
}

/// One link, one request at a time
pub fn quick_config() -> RemoteConfig {
    RemoteConfig {
        link_max: 1,
        pipeline_max: 1,
        connect_timeout: Duration::from_secs(1),
        link_idle_timeout: Duration::from_secs(30),
        ..RemoteConfig::default()
    }
}

/// A remote and the count of connections it has opened
pub fn remote(conf: RemoteConfig, connector: DuplexConnector) -> (Remote, Arc<AtomicUsize>) {
    let connects = connector.connects();
    (Remote::with_connector(conf, connector), connects)
}

pub fn submit(remote: &Remote, path: &str) -> Request {
    let mut request = Request::get(target(), path).with_opts(remote.opts());
    remote.submit(&mut request);
    request
}

pub async fn outcome(request: &mut Request) -> Result<Response, RemoteError> {
    timeout(WAIT, request.response())
        .await
        .expect("timed out waiting for a response")
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
