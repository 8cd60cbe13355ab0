mod utils;

use pretty_assertions::assert_eq;
use std::{sync::atomic::Ordering, time::Duration};
use strand_network::http::Code;
use client_listener::{ClientConfig, ClientState};
use utils::*;

#[tokio::test]
async fn serves_a_request() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n").await;
    let (head, content) = peer.response().await;

    assert_eq!(head.code, Code::OK);
    assert_eq!(&content[..], b"hello");
    assert!(fixture.ctx.registry.contains(peer.client.id));
}

#[tokio::test]
async fn keeps_serving_one_connection() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    for round in 0..3u8 {
        let body = [b'a' + round; 6];
        let mut request = b"POST /echo HTTP/1.1\r\nContent-Length: 6\r\n\r\n".to_vec();
        request.extend_from_slice(&body);
        peer.send(&request).await;

        let (head, content) = peer.response().await;
        assert_eq!(head.code, Code::OK);
        assert_eq!(&content[..], &body[..]);
    }

    eventually(|| peer.client.requests_served() == 3).await;
    assert_eq!(fixture.echoes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn pipelined_requests_answer_in_order() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(
        b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\none\
          GET /hello HTTP/1.1\r\n\r\n\
          POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nthree",
    )
    .await;

    assert_eq!(&peer.response().await.1[..], b"one");
    assert_eq!(&peer.response().await.1[..], b"hello");
    assert_eq!(&peer.response().await.1[..], b"three");
}

#[tokio::test]
async fn idle_timeout_closes_once() {
    let fixture = fixture(ClientConfig {
        idle_timeout: Duration::from_millis(50),
        ..quick_config()
    });
    let mut peer = fixture.connect();
    assert_eq!(fixture.ctx.registry.len(), 1);

    peer.closed().await;
    eventually(|| fixture.ctx.registry.is_empty()).await;
    assert!(peer.client.is_closed());
    assert_eq!(peer.client.state(), ClientState::Closed);

    // A second close must not touch the registry again
    peer.client.close(strand_network::Dc::Rst).await;
    assert!(fixture.ctx.registry.is_empty());
}

#[tokio::test]
async fn incomplete_content_never_reaches_handler() {
    let fixture = fixture(ClientConfig {
        request_timeout: Duration::from_millis(50),
        ..quick_config()
    });
    let mut peer = fixture.connect();

    peer.send(b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcd").await;

    let (head, _) = peer.response().await;
    assert_eq!(head.code, Code::REQUEST_TIMEOUT);
    peer.closed().await;

    eventually(|| fixture.ctx.registry.is_empty()).await;
    assert_eq!(fixture.echoes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn client_error_closes_after_response() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /fail/400 HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n").await;

    let (head, content) = peer.response().await;
    assert_eq!(head.code, Code::BAD_REQUEST);
    assert_eq!(head.header("connection"), Some("close"));
    let body: serde_json::Value = serde_json::from_slice(&content).unwrap();
    assert_eq!(body["error"], "requested failure");

    peer.closed().await;
    eventually(|| fixture.ctx.registry.is_empty()).await;
}

#[tokio::test]
async fn server_error_closes() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /fail/503 HTTP/1.1\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::SERVICE_UNAVAILABLE);
    peer.closed().await;
}

#[tokio::test]
async fn other_errors_keep_connection() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /missing HTTP/1.1\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::NOT_FOUND);

    peer.send(b"GET /fail/409 HTTP/1.1\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::CONFLICT);

    peer.send(b"POST /hello HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::METHOD_NOT_ALLOWED);

    peer.send(b"GET /hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::OK);
    assert!(fixture.ctx.registry.contains(peer.client.id));
}

#[tokio::test]
async fn malformed_head_is_bad_request() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /hello HTTP/1.1\r\nContent-Length: lots\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::BAD_REQUEST);
    peer.closed().await;
}

#[tokio::test]
async fn oversized_content_is_refused() {
    let fixture = fixture(ClientConfig {
        content_maxalloc: 8,
        ..quick_config()
    });
    let mut peer = fixture.connect();

    peer.send(b"POST /echo HTTP/1.1\r\nContent-Length: 100\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::PAYLOAD_TOO_LARGE);
    peer.closed().await;
    assert_eq!(fixture.echoes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connection_close_is_honoured() {
    let fixture = fixture(quick_config());
    let mut peer = fixture.connect();

    peer.send(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(peer.response().await.0.code, Code::OK);
    peer.closed().await;
}

#[tokio::test]
async fn shutdown_disconnects_everyone() {
    let fixture = fixture(quick_config());
    let mut peers: Vec<_> = (0..3).map(|_| fixture.connect()).collect();
    assert_eq!(fixture.ctx.registry.len(), 3);

    fixture.ctx.shutdown().await;

    assert!(fixture.ctx.registry.is_empty());
    for peer in peers.iter_mut() {
        peer.closed().await;
        assert!(peer.client.is_closed());
    }
}
