use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use client_listener::*;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use strand_network::{
    http::{Code, HttpError, Response, ResponseHead},
    Socket,
};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

/// Answers `GET` with a fixed body
pub struct Hello;

#[async_trait]
impl Resource for Hello {
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError> {
        request.require_method("GET")?;
        request
            .respond(Response::new(Code::OK).with_content("text/plain", "hello"))
            .await
    }
}

/// Sends the request content back, counting calls
pub struct Echo(pub Arc<AtomicUsize>);

#[async_trait]
impl Resource for Echo {
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError> {
        self.0.fetch_add(1, Ordering::SeqCst);

        let mut content = Vec::new();
        let mut chunk = [0u8; 4];
        loop {
            let n = request.read(&mut chunk);
            if n == 0 {
                break;
            }
            content.extend_from_slice(&chunk[..n]);
        }

        request
            .respond(Response::new(Code::OK).with_content("application/octet-stream", content))
            .await
    }
}

/// Fails with the status in its path parameter
pub struct Fail;

#[async_trait]
impl Resource for Fail {
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError> {
        let code = request
            .param(0)
            .and_then(|p| p.parse().ok())
            .unwrap_or(400);
        Err(HttpError::new(Code(code), "requested failure").into())
    }
}

pub struct Fixture {
    pub ctx: Arc<ClientContext>,
    pub echoes: Arc<AtomicUsize>,
    ids: ConnectionIdGenerator,
}

pub fn fixture(conf: ClientConfig) -> Fixture {
    let echoes = Arc::new(AtomicUsize::new(0));
    let resources = ResourceRegistry::new();
    resources.add("/hello", false, Arc::new(Hello));
    resources.add("/echo", false, Arc::new(Echo(Arc::clone(&echoes))));
    resources.add("/fail", true, Arc::new(Fail));

    Fixture {
        ctx: ClientContext::new(conf, resources),
        echoes,
        ids: ConnectionIdGenerator::new(ListenerId::new(1), 1),
    }
}

pub fn quick_config() -> ClientConfig {
    ClientConfig {
        idle_timeout: Duration::from_secs(30),
        request_timeout: Duration::from_secs(30),
        request_pool_size: 4,
        ..ClientConfig::default()
    }
}

/// The test's end of one client connection
pub struct Peer {
    pub client: Arc<Client>,
    stream: DuplexStream,
    buf: BytesMut,
}

impl Fixture {
    pub fn connect(&self) -> Peer {
        let (ours, theirs) = duplex(64 * 1024);
        let id = self.ids.next();
        let client = self
            .ctx
            .add_client(id, Socket::with_label(ours, format!("test:{}", id.local())));

        Peer {
            client,
            stream: theirs,
            buf: BytesMut::new(),
        }
    }
}

impl Peer {
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Read the next complete response
    pub async fn response(&mut self) -> (ResponseHead, Bytes) {
        loop {
            if let Some(head) = ResponseHead::parse(&self.buf).unwrap() {
                let total = head.head_len + head.content_length.unwrap_or(0);
                if self.buf.len() >= total {
                    let mut frame = self.buf.split_to(total);
                    let content = frame.split_off(head.head_len).freeze();
                    return (head, content);
                }
            }

            let n = timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for a response")
                .unwrap();
            assert!(n > 0, "connection closed before a complete response");
        }
    }

    /// Wait for the server to close the connection
    pub async fn closed(&mut self) {
        let mut rest = Vec::new();
        timeout(WAIT, self.stream.read_to_end(&mut rest))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert!(rest.is_empty(), "unexpected bytes before close: {:?}", rest);
    }
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
