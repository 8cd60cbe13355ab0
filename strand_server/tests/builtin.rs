use async_trait::async_trait;
use bytes::BytesMut;
use client_listener::{ClientConfig, ClientContext, ConnectionId, ListenerId, ResourceRegistry};
use pretty_assertions::assert_eq;
use std::{sync::Arc, time::Duration};
use strand_network::{
    http::{Code, ResponseHead},
    Socket,
};
use strand_remote::{Connector, HostPort, Remote, RemoteConfig, RemoteError};
use strand_server::*;
use tokio::{
    io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

/// Answers anything with a canned federation version
struct CannedRemote;

#[async_trait]
impl Connector for CannedRemote {
    async fn connect(&self, target: &HostPort, _timeout: Duration) -> Result<Socket, RemoteError> {
        let (ours, mut theirs) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                match theirs.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            let body = r#"{"server":{"name":"Remote","version":"1.0"}}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = theirs.write_all(response.as_bytes()).await;
            std::future::pending::<()>().await;
        });
        Ok(Socket::with_label(ours, target.to_string()))
    }
}

fn context() -> Arc<ClientContext> {
    let remote = Arc::new(Remote::with_connector(RemoteConfig::default(), CannedRemote));
    let resources = ResourceRegistry::new();
    register_builtin(
        &resources,
        &ResourceEnv {
            server_name: "strand.test".to_string(),
            remote,
        },
    );
    ClientContext::new(ClientConfig::default(), resources)
}

async fn exchange<S>(stream: &mut S, request: &str) -> (ResponseHead, serde_json::Value)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = BytesMut::new();
    loop {
        if let Some(head) = ResponseHead::parse(&buf[..]).unwrap() {
            let total = head.head_len + head.content_length.unwrap_or(0);
            if buf.len() >= total {
                let content = &buf[head.head_len..total];
                let value = serde_json::from_slice(content).unwrap();
                return (head, value);
            }
        }
        let n = timeout(WAIT, stream.read_buf(&mut buf))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        assert!(n > 0, "connection closed before a complete response");
    }
}

#[tokio::test]
async fn version_is_served() {
    let ctx = context();
    let (ours, mut theirs) = duplex(4096);
    ctx.add_client(
        ConnectionId::new(ListenerId::new(1), 1),
        Socket::with_label(ours, "test"),
    );

    let (head, body) = exchange(&mut theirs, "GET /_strand/version HTTP/1.1\r\n\r\n").await;
    assert_eq!(head.code, Code::OK);
    assert_eq!(body["server"]["name"], "strand.test");
    assert_eq!(body["server"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn remote_version_is_relayed() {
    let ctx = context();
    let (ours, mut theirs) = duplex(4096);
    ctx.add_client(
        ConnectionId::new(ListenerId::new(1), 1),
        Socket::with_label(ours, "test"),
    );

    let (head, body) = exchange(
        &mut theirs,
        "GET /_strand/remote/version/remote.test:8448 HTTP/1.1\r\n\r\n",
    )
    .await;
    assert_eq!(head.code, Code::OK);
    assert_eq!(body["server"]["name"], "Remote");

    let (head, body) = exchange(
        &mut theirs,
        "GET /_strand/remote/version/not:a:host HTTP/1.1\r\n\r\n",
    )
    .await;
    assert_eq!(head.code, Code::BAD_REQUEST);
    assert_eq!(body["errcode"], "M_BAD_JSON");
}

#[tokio::test]
async fn server_accepts_and_shuts_down() {
    let conf = ServerConfig::parse(
        r#"{
            "server-name": "strand.test",
            listeners: [ "127.0.0.1:0" ],
            log: { dir: "log/", targets: [] },
        }"#,
    )
    .unwrap();

    let server = Server::new(conf).await.unwrap();
    let address = server.local_addresses()[0];
    assert_ne!(address.port(), 0);

    let mut stream = TcpStream::connect(address).await.unwrap();
    let (head, body) = exchange(&mut stream, "GET /_strand/version HTTP/1.1\r\n\r\n").await;
    assert_eq!(head.code, Code::OK);
    assert_eq!(body["server"]["name"], "strand.test");

    let clients = Arc::clone(server.clients());
    server.shutdown().await;
    assert!(clients.registry.is_empty());

    let mut rest = Vec::new();
    let _ = timeout(WAIT, stream.read_to_end(&mut rest)).await.unwrap();
}
