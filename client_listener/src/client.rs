use crate::*;

use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use strand_network::{
    http::{Code, HttpError, RequestHead, Response},
    invariant_violation,
    socket::UNKNOWN_ADDR,
    task, Dc, Socket, SocketError, TaskContext, TimeoutOutcome,
};

/// Where a client is in its serve cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ClientState
{
    Accepted,
    AwaitingHead,
    ParsingBody,
    Dispatched,
    Closed,
}

/// One inbound connection.
///
/// A `Client` is kept alive by whichever task is currently reading from or
/// serving it; the registry only holds a weak reference. Once it is closed
/// no further reads are scheduled, so the last reference goes away with the
/// task that closed it.
pub struct Client
{
    pub id: ConnectionId,
    sock: Option<Arc<Socket>>,
    ctx: Arc<ClientContext>,
    state: Mutex<ClientState>,
    reader: tokio::sync::Mutex<RequestReader>,
    responding: AtomicBool,
    graceful: AtomicBool,
    closed: AtomicBool,
    served: AtomicU64,
}

impl Client
{
    pub(crate) fn new(id: ConnectionId, sock: Option<Socket>, ctx: Arc<ClientContext>) -> Self
    {
        let buffer_size = ctx.conf.buffer_size;
        Self {
            id,
            sock: sock.map(Arc::new),
            ctx,
            state: Mutex::new(ClientState::Accepted),
            reader: tokio::sync::Mutex::new(RequestReader::new(buffer_size)),
            responding: AtomicBool::new(false),
            graceful: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            served: AtomicU64::new(0),
        }
    }

    /// A client that was never connected. It can't be served, and isn't
    /// registered anywhere.
    pub fn detached(id: ConnectionId, ctx: &Arc<ClientContext>) -> Arc<Self>
    {
        Arc::new(Self::new(id, None, Arc::clone(ctx)))
    }

    pub fn is_servable(&self) -> bool
    {
        self.sock.is_some() && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool
    {
        self.closed.load(Ordering::Acquire)
    }

    /// The remote address, as `address:port`
    pub fn remote(&self) -> &str
    {
        self.sock.as_ref().map_or(UNKNOWN_ADDR, |s| s.remote())
    }

    pub fn state(&self) -> ClientState
    {
        *self.state.lock()
    }

    fn set_state(&self, state: ClientState)
    {
        *self.state.lock() = state;
    }

    /// Requests answered so far
    pub fn requests_served(&self) -> u64
    {
        self.served.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_responding(&self)
    {
        self.responding.store(true, Ordering::Release);
    }

    fn socket(&self) -> Result<&Arc<Socket>, SocketError>
    {
        self.sock.as_ref().ok_or(SocketError::NotConnected)
    }

    /// Wait for the next bytes from the client in a fresh task, then serve
    /// them from the request pool.
    pub(crate) fn async_recv_next(self: &Arc<Self>, timeout: Duration)
    {
        let client = Arc::clone(self);
        task::spawn("client-recv", move |task| client.recv(task, timeout));
    }

    async fn recv(self: Arc<Self>, task: TaskContext, timeout: Duration) -> anyhow::Result<()>
    {
        let sock = match self.socket()
        {
            Ok(sock) => Arc::clone(sock),
            Err(_) =>
            {
                invariant_violation("read scheduled for a client with no socket");
                return Ok(());
            }
        };

        match task.suspend_until(sock.wait_ready(Some(timeout))).await
        {
            Ok(Ok(())) => (),
            Ok(Err(e)) =>
            {
                self.handle_ec(&e);
                self.close(Dc::Rst).await;
                return Ok(());
            }
            Err(e) =>
            {
                tracing::debug!("client[{}]: {}", self.remote(), e);
                self.close(Dc::Rst).await;
                return Ok(());
            }
        }

        let client = Arc::clone(&self);
        if let Err(e) = self.ctx.pool.submit(move |task| client.main(task)).await
        {
            tracing::debug!("client[{}]: not served: {}", self.remote(), e);
            self.close(Dc::Rst).await;
        }
        Ok(())
    }

    /// Log why the wait for the next request ended
    fn handle_ec(&self, e: &SocketError)
    {
        match e
        {
            SocketError::Eof => tracing::debug!("client[{}]: end of stream", self.remote()),
            SocketError::Timeout => tracing::debug!("client[{}]: idle timeout", self.remote()),
            SocketError::Canceled | SocketError::NotConnected =>
                tracing::trace!("client[{}]: {}", self.remote(), e),
            _ => tracing::warn!("client[{}]: {}", self.remote(), e),
        }
    }

    async fn main(self: Arc<Self>, task: TaskContext) -> anyhow::Result<()>
    {
        let result = match task.suspend_until(self.serve()).await
        {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };

        match result
        {
            Ok(true) =>
            {
                self.async_recv_next(self.ctx.conf.idle_timeout);
                Ok(())
            }
            Ok(false) =>
            {
                let dc = if self.graceful.load(Ordering::Acquire) { Dc::Fin } else { Dc::Rst };
                self.close(dc).await;
                Ok(())
            }
            Err(e) if e.is_quiet() =>
            {
                tracing::debug!("client[{}]: {}", self.remote(), e);
                self.close(Dc::Rst).await;
                Ok(())
            }
            Err(e) =>
            {
                tracing::error!("client[{}]: {}", self.remote(), e);
                self.close(Dc::Rst).await;
                Err(anyhow::Error::new(e).context(format!("serving client[{}]", self.remote())))
            }
        }
    }

    /// Serve every request that's been buffered. Returns whether to keep
    /// reading from this client.
    async fn serve(self: &Arc<Self>) -> Result<bool, ServeError>
    {
        let sock = Arc::clone(self.socket()?);
        let mut reader = self.reader.lock().await;

        loop
        {
            if !self.handle_request(&sock, &mut reader).await?
            {
                return Ok(false);
            }
            if !reader.has_unparsed()
            {
                return Ok(true);
            }
        }
    }

    async fn handle_request(self: &Arc<Self>, sock: &Arc<Socket>, reader: &mut RequestReader) -> Result<bool, ServeError>
    {
        self.responding.store(false, Ordering::Release);

        let result = match self.receive(sock, reader).await
        {
            Ok((head, content)) => self.dispatch(sock, head, content).await,
            Err(e) => Err(e),
        };

        match result
        {
            Ok(keep_alive) =>
            {
                self.served.fetch_add(1, Ordering::Relaxed);
                if !keep_alive
                {
                    self.graceful.store(true, Ordering::Release);
                }
                Ok(keep_alive)
            }
            Err(ServeError::Http(e)) => self.handle_http_error(sock, e).await,
            Err(e) => Err(e),
        }
    }

    /// Read one request head and its content under the request timeout.
    async fn receive(&self, sock: &Arc<Socket>, reader: &mut RequestReader) -> Result<(RequestHead, Bytes), ServeError>
    {
        let remote = self.remote().to_string();
        sock.set_timeout(self.ctx.conf.request_timeout, move |outcome| {
            if outcome == TimeoutOutcome::Expired
            {
                tracing::debug!("client[{}]: request timed out", remote);
            }
        });

        let result = async {
            self.set_state(ClientState::AwaitingHead);
            let head = reader.read_head(sock).await?;

            self.set_state(ClientState::ParsingBody);
            if head.content_length > self.ctx.conf.content_maxalloc
            {
                return Err(ServeError::from(HttpError::new(Code::PAYLOAD_TOO_LARGE,
                                                           format!("Content length {} exceeds {}", head.content_length, self.ctx.conf.content_maxalloc))));
            }
            let content = reader.read_content(sock, head.content_length).await?;
            Ok::<_, ServeError>((head, content))
        }.await;

        // The timer is only gone already if it fired
        let expired = !sock.cancel_timeout();

        match result
        {
            Err(ServeError::Socket(SocketError::Canceled)) if expired =>
                Err(HttpError::new(Code::REQUEST_TIMEOUT, "Request timed out").into()),
            other => other,
        }
    }

    async fn dispatch(self: &Arc<Self>, sock: &Arc<Socket>, head: RequestHead, content: Bytes) -> Result<bool, ServeError>
    {
        self.set_state(ClientState::Dispatched);
        tracing::trace!("client[{}]: {} {}", self.remote(), head.method, head.path);

        let (resource, params) = self.ctx.resources.find(&head.path)
                                     .ok_or_else(|| HttpError::not_found(format!("No resource at {}", head.path)))?;

        let keep_alive = head.keep_alive();
        let mut request = ResourceRequest::new(Arc::clone(self), Arc::clone(sock), head, params, content);
        resource.handle(&mut request).await?;

        if !request.started()
        {
            request.respond(Response::new(Code::OK)).await?;
        }
        Ok(keep_alive)
    }

    /// Answer an error status, if nothing has been sent for this request yet.
    /// Returns whether the connection stays open.
    async fn handle_http_error(&self, sock: &Socket, e: HttpError) -> Result<bool, ServeError>
    {
        let close = e.code.closes_connection();

        if e.code.is_server_error()
        {
            tracing::error!("client[{}]: {}", self.remote(), e);
        }
        else
        {
            tracing::debug!("client[{}]: {}", self.remote(), e);
        }

        if self.responding.load(Ordering::Acquire)
        {
            // Part of another response is already out
            return Ok(false);
        }

        let mut response = Response::error(&e);
        if close
        {
            response = response.with_header("Connection", "close");
        }
        sock.write_all(&response.to_bytes()).await?;

        if close
        {
            self.graceful.store(true, Ordering::Release);
        }
        Ok(!close)
    }

    /// Disconnect and deregister. Only the first call has any effect.
    pub async fn close(&self, dc: Dc)
    {
        if self.closed.swap(true, Ordering::AcqRel)
        {
            return;
        }
        self.set_state(ClientState::Closed);

        if let Some(sock) = &self.sock
        {
            if let Err(e) = sock.disconnect(dc).await
            {
                tracing::debug!("client[{}]: error disconnecting: {}", self.remote(), e);
            }

            if !self.ctx.registry.unregister(self.id)
            {
                invariant_violation("client closed but not registered");
            }
        }

        tracing::debug!("client[{}]: closed after {} requests", self.remote(), self.requests_served());
    }
}

impl std::fmt::Debug for Client
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Client")
         .field("id", &self.id)
         .field("remote", &self.remote())
         .field("state", &self.state())
         .finish()
    }
}
