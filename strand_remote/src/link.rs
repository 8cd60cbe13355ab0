use crate::{
    peer::{Front, LinkFailure},
    In, InContent, Peer, RemoteError, Response,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use strand_network::{
    http::{extend_capped, ChunkedDecoder, Framing, ResponseHead},
    Dc, Socket, SocketError,
};
use tokio::{
    select,
    sync::{watch, Notify},
    time,
};

/// Why a link stopped
#[derive(Debug)]
enum LinkEnd {
    /// Idle past its timeout, or closed by the remote with nothing outstanding
    Retired,
    /// The remote is closing it; anything still queued on it is reset
    Closing,
    /// Reset locally
    Aborted,
    ConnectFailed(RemoteError),
    Failed(RemoteError),
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn report(input: &mut In, piece: usize, total: usize) {
    if let Some(progress) = input.progress.as_mut() {
        progress(piece, total);
    }
}

fn too_large(cap: usize) -> RemoteError {
    RemoteError::Protocol(format!("content exceeds {} bytes", cap))
}

/// One connection to a remote.
///
/// Two loops share the socket: the writer sends queued requests back to
/// back, and the reader takes responses off in the same order.
pub(crate) struct Link {
    id: u64,
    label: String,
    sock: Mutex<Option<Arc<Socket>>>,
    abort: watch::Sender<bool>,
    pub notify_write: Notify,
    pub notify_read: Notify,
}

impl Link {
    pub fn new(id: u64, label: String) -> Self {
        let (abort, _) = watch::channel(false);
        Self {
            id,
            label,
            sock: Mutex::new(None),
            abort,
            notify_write: Notify::new(),
            notify_read: Notify::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop both loops now and reset the connection
    pub fn abort(&self) {
        self.abort.send_replace(true);
    }

    #[tracing::instrument(skip_all, fields(link = %self.label))]
    pub async fn run(self: Arc<Self>, peer: Arc<Peer>) -> anyhow::Result<()> {
        let mut abort = self.abort.subscribe();
        let end = select! {
            biased;
            _ = aborted(&mut abort) => LinkEnd::Aborted,
            end = self.drive(&peer) => end,
        };
        tracing::debug!("link[{}]: finished: {:?}", self.label, end);

        let dc = match end {
            LinkEnd::Retired => Dc::Fin,
            LinkEnd::Closing => {
                peer.fail_link(self.id, RemoteError::ConnectionReset, LinkFailure::Broken);
                Dc::Fin
            }
            LinkEnd::Aborted => {
                peer.fail_link(self.id, RemoteError::ConnectionReset, LinkFailure::Broken);
                Dc::Rst
            }
            LinkEnd::ConnectFailed(e) => {
                peer.fail_link(self.id, e, LinkFailure::Connect);
                Dc::Rst
            }
            LinkEnd::Failed(e) => {
                peer.fail_link(self.id, e, LinkFailure::Broken);
                Dc::Rst
            }
        };

        let sock = self.sock.lock().take();
        if let Some(sock) = sock {
            if let Err(e) = sock.disconnect(dc).await {
                tracing::debug!("link[{}]: error disconnecting: {}", self.label, e);
            }
        }
        Ok(())
    }

    async fn drive(&self, peer: &Arc<Peer>) -> LinkEnd {
        let timeout = peer.conf.connect_timeout;
        let sock = match time::timeout(timeout, peer.connector.connect(&peer.target, timeout)).await
        {
            Ok(Ok(sock)) => Arc::new(sock),
            Ok(Err(e)) => return LinkEnd::ConnectFailed(e),
            Err(_) => return LinkEnd::ConnectFailed(RemoteError::Timeout),
        };
        tracing::debug!("link[{}]: connected to {}", self.label, sock.remote());
        *self.sock.lock() = Some(Arc::clone(&sock));

        select! {
            end = self.write_loop(peer, &sock) => end,
            end = self.read_loop(peer, &sock) => end,
        }
    }

    async fn write_loop(&self, peer: &Arc<Peer>, sock: &Socket) -> LinkEnd {
        let chunk = peer.conf.write_chunk.max(1);

        loop {
            let (id, mut out) = match peer.next_write(self.id) {
                Some(next) => next,
                None => {
                    self.notify_write.notified().await;
                    continue;
                }
            };

            let written = async {
                sock.write_all(&out.head).await?;

                let mut total = 0;
                for piece in out.content.chunks(chunk) {
                    sock.write_all(piece).await?;
                    total += piece.len();
                    if let Some(progress) = out.progress.as_mut() {
                        progress(piece.len(), total);
                    }
                }
                Ok::<_, SocketError>(())
            }
            .await;

            if let Err(e) = written {
                return LinkEnd::Failed(e.into());
            }

            tracing::trace!("link[{}]: wrote {:?}", self.label, id);
            peer.written(id);
            self.notify_read.notify_one();
        }
    }

    async fn read_loop(&self, peer: &Arc<Peer>, sock: &Socket) -> LinkEnd {
        let idle_timeout = peer.conf.link_idle_timeout;
        let mut buf = BytesMut::new();

        loop {
            match peer.front(self.id) {
                Front::Gone => return LinkEnd::Aborted,
                Front::Waiting => self.notify_read.notified().await,
                Front::Idle => {
                    if !buf.is_empty() {
                        return LinkEnd::Failed(RemoteError::Protocol(
                            "unsolicited data from remote".to_string(),
                        ));
                    }

                    select! {
                        _ = self.notify_read.notified() => (),
                        ready = sock.wait_ready(Some(idle_timeout)) => match ready {
                            Ok(()) => {
                                if peer.is_idle(self.id) {
                                    return LinkEnd::Failed(RemoteError::Protocol(
                                        "unsolicited data from remote".to_string(),
                                    ));
                                }
                            }
                            Err(SocketError::Timeout) => {
                                if peer.try_retire(self.id) {
                                    return LinkEnd::Retired;
                                }
                            }
                            Err(SocketError::Eof) => {
                                return if peer.try_retire(self.id) {
                                    LinkEnd::Retired
                                } else {
                                    LinkEnd::Closing
                                };
                            }
                            Err(e) => return LinkEnd::Failed(e.into()),
                        },
                    }
                }
                Front::Ready {
                    id,
                    mut input,
                    content_length_maxalloc,
                } => {
                    let head_max = match input.head_max {
                        0 => peer.conf.head_max,
                        n => n,
                    };
                    let cap = match input.content {
                        InContent::Fixed(cap) => cap,
                        InContent::Dynamic => content_length_maxalloc,
                    };

                    match read_response(sock, &mut buf, head_max, cap, &mut input).await {
                        Ok(response) => {
                            let keep_alive = response.head.keep_alive();
                            peer.complete(self.id, id, response, keep_alive);
                            if !keep_alive {
                                return LinkEnd::Closing;
                            }
                        }
                        Err(e) => return LinkEnd::Failed(e),
                    }
                }
            }
        }
    }
}

/// Read one final response. Interim 1xx responses are skipped. Bytes past
/// the end of the response stay in `buf`.
async fn read_response(
    sock: &Socket,
    buf: &mut BytesMut,
    head_max: usize,
    cap: usize,
    input: &mut In,
) -> Result<Response, RemoteError> {
    let head = loop {
        if let Some(head) = ResponseHead::parse(&buf[..])? {
            if head.head_len > head_max {
                break Err(head.head_len);
            }
            let _ = buf.split_to(head.head_len);
            if head.code.is_informational() {
                continue;
            }
            break Ok(head);
        }
        if buf.len() >= head_max {
            break Err(buf.len());
        }
        sock.read_buf(buf).await?;
    };
    let head = head.map_err(|len| {
        RemoteError::Protocol(format!(
            "response head of {} bytes exceeds {}",
            len, head_max
        ))
    })?;

    // Content never takes more than `cap` bytes. A larger response is read
    // up to the cap and then refused.
    let mut content = Vec::new();
    match head.framing() {
        Framing::Length(len) => {
            let want = len.min(cap);
            content.reserve_exact(want);
            while content.len() < want {
                if buf.is_empty() {
                    sock.read_buf(buf).await?;
                }
                let take = (want - content.len()).min(buf.len());
                content.extend_from_slice(&buf.split_to(take));
                report(input, take, content.len());
            }
            if len > cap {
                return Err(RemoteError::Protocol(format!(
                    "content length {} exceeds {}",
                    len, cap
                )));
            }
        }
        Framing::Chunked => {
            let mut decoder = ChunkedDecoder::new();
            loop {
                let before = content.len();
                let used = decoder.decode(&buf[..], &mut content, cap);
                if content.len() > before {
                    report(input, content.len() - before, content.len());
                }
                let _ = buf.split_to(used?);
                if decoder.is_done() {
                    break;
                }
                sock.read_buf(buf).await?;
            }
        }
        Framing::UntilClose => loop {
            if !buf.is_empty() {
                let taken = extend_capped(&mut content, &buf[..], cap);
                let _ = buf.split_to(taken);
                if taken > 0 {
                    report(input, taken, content.len());
                }
                if !buf.is_empty() {
                    return Err(too_large(cap));
                }
            }
            match sock.read_buf(buf).await {
                Ok(_) => (),
                Err(SocketError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        },
    }

    Ok(Response {
        head,
        content: Bytes::from(content),
    })
}
