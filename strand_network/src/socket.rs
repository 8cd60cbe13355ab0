//! A cancelable, timeout-capable byte stream endpoint shared by the inbound
//! and outbound sides.

use crate::SocketError;

use bytes::BytesMut;
use parking_lot::Mutex;
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
        DuplexStream, ReadHalf, WriteHalf,
    },
    net::TcpStream,
    select,
    sync::{oneshot, watch, Mutex as AsyncMutex},
    time,
};

const OPEN: u8 = 0;
const HALF_CLOSED: u8 = 1;
const CLOSED: u8 = 2;

/// Label used for endpoints whose address can't be determined
pub const UNKNOWN_ADDR: &str = "0.0.0.0:0";

/// A byte stream that can be owned by a [`Socket`].
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Arrange for the close which follows to reset the connection instead of
    /// flushing it.
    fn set_abortive(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn set_abortive(&self) -> io::Result<()> {
        socket2::SockRef::from(self).set_linger(Some(Duration::ZERO))
    }
}

impl Transport for DuplexStream {}

type BoxedTransport = Box<dyn Transport>;

/// How to close a [`Socket`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dc {
    /// Flush pending output and close the sending direction.
    Fin,
    /// Drop the connection immediately, resetting it where the transport
    /// supports that.
    Rst,
}

/// What happened to a timer armed with [`Socket::set_timeout`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The deadline passed; pending operations on the socket were canceled.
    Expired,
    /// The timer was disarmed, replaced, or the socket went away first.
    Disarmed,
}

/// A single transport connection.
///
/// Reads and writes go through separate halves so that one read and one write
/// may be outstanding at the same time. Ordering between concurrent readers
/// (or concurrent writers) is the caller's business.
pub struct Socket {
    remote: String,
    local: String,
    reader: AsyncMutex<Option<BufReader<ReadHalf<BoxedTransport>>>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedTransport>>>,
    cancel: watch::Sender<u64>,
    timer: Mutex<Option<(u64, oneshot::Sender<()>)>>,
    timer_seq: AtomicU64,
    /// Set when the armed deadline passes; cleared by the next `set_timeout`
    /// or `cancel_timeout`
    expired: AtomicBool,
    state: AtomicU8,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// Resolves once the socket's cancel epoch has moved past the value `rx` was
/// subscribed at.
async fn canceled(rx: &mut watch::Receiver<u64>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Socket {
    /// Take ownership of a connected transport
    pub fn new(transport: impl Transport) -> Self {
        let remote = transport
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| UNKNOWN_ADDR.to_string());
        Self::with_label(transport, remote)
    }

    /// Take ownership of a connected transport, naming the remote end explicitly
    pub fn with_label(transport: impl Transport, remote: impl Into<String>) -> Self {
        let local = transport
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| UNKNOWN_ADDR.to_string());

        let boxed: BoxedTransport = Box::new(transport);
        let (read, write) = tokio::io::split(boxed);
        let (cancel, _) = watch::channel(0);

        Self {
            remote: remote.into(),
            local,
            reader: AsyncMutex::new(Some(BufReader::new(read))),
            writer: AsyncMutex::new(Some(write)),
            cancel,
            timer: Mutex::new(None),
            timer_seq: AtomicU64::new(0),
            expired: AtomicBool::new(false),
            state: AtomicU8::new(OPEN),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Open a TCP connection to `addr`, giving up after `timeout`
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, SocketError> {
        let stream = time::timeout(timeout, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// The remote endpoint, as `address:port`
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// The local endpoint, as `address:port`
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Whether both directions are still open
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Fails every operation started after the deadline passed, until the
    /// timer is re-armed or disarmed.
    fn check_deadline(&self) -> Result<(), SocketError> {
        if self.expired.load(Ordering::SeqCst) {
            Err(SocketError::Canceled)
        } else {
            Ok(())
        }
    }

    fn check_open(&self, writing: bool) -> Result<(), SocketError> {
        match self.state.load(Ordering::Acquire) {
            OPEN => Ok(()),
            HALF_CLOSED if !writing => Ok(()),
            _ => Err(SocketError::NotConnected),
        }
    }

    /// Wait until data is available to read, without consuming it.
    ///
    /// End of stream is reported as [`SocketError::Eof`], and an elapsed
    /// `timeout` as [`SocketError::Timeout`].
    pub async fn wait_ready(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        let mut cancel = self.cancel.subscribe();
        self.check_deadline()?;
        let mut guard = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            guard = self.reader.lock() => guard,
        };
        self.check_open(false)?;
        let reader = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let fill = async {
            let available = reader.fill_buf().await?.len();
            Ok::<_, SocketError>(available)
        };
        let waited = async {
            match timeout {
                Some(limit) => time::timeout(limit, fill).await?,
                None => fill.await,
            }
        };

        let available = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            res = waited => res?,
        };

        if available == 0 {
            Err(SocketError::Eof)
        } else {
            Ok(())
        }
    }

    /// Read some bytes into `buf`, suspending until at least one is available.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut cancel = self.cancel.subscribe();
        self.check_deadline()?;
        let mut guard = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            guard = self.reader.lock() => guard,
        };
        self.check_open(false)?;
        let reader = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let n = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            res = reader.read(buf) => res?,
        };

        if n == 0 && !buf.is_empty() {
            return Err(SocketError::Eof);
        }
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Append whatever can be read next to `buf`.
    pub async fn read_buf(&self, buf: &mut BytesMut) -> Result<usize, SocketError> {
        let mut cancel = self.cancel.subscribe();
        self.check_deadline()?;
        let mut guard = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            guard = self.reader.lock() => guard,
        };
        self.check_open(false)?;
        let reader = guard.as_mut().ok_or(SocketError::NotConnected)?;

        buf.reserve(4096);
        let n = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            res = reader.read_buf(buf) => res?,
        };

        if n == 0 {
            return Err(SocketError::Eof);
        }
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Write all of `buf` and flush it.
    pub async fn write_all(&self, buf: &[u8]) -> Result<usize, SocketError> {
        self.write_bufs(&[buf]).await
    }

    /// Write each buffer in turn, then flush. Returns the total written.
    pub async fn write_bufs(&self, bufs: &[&[u8]]) -> Result<usize, SocketError> {
        let mut cancel = self.cancel.subscribe();
        self.check_deadline()?;
        let mut guard = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            guard = self.writer.lock() => guard,
        };
        self.check_open(true)?;
        let writer = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let write = async {
            let mut total = 0;
            for buf in bufs {
                writer.write_all(buf).await?;
                total += buf.len();
            }
            writer.flush().await?;
            Ok::<_, SocketError>(total)
        };

        let total = select! {
            biased;
            _ = canceled(&mut cancel) => return Err(SocketError::Canceled),
            res = write => res?,
        };

        self.bytes_written.fetch_add(total as u64, Ordering::Relaxed);
        Ok(total)
    }

    /// Cancel whichever read and write are pending right now. They fail with
    /// [`SocketError::Canceled`]; later operations are unaffected.
    pub fn cancel(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Arm a deadline. If it passes before [`cancel_timeout`](Self::cancel_timeout)
    /// is called, pending operations are canceled, operations started later
    /// fail with [`SocketError::Canceled`] until the timer is disarmed or
    /// re-armed, and `on_expire` is told so; otherwise `on_expire` receives
    /// [`TimeoutOutcome::Disarmed`].
    ///
    /// Arming a new timeout disarms any previous one.
    pub fn set_timeout<F>(self: &Arc<Self>, duration: Duration, on_expire: F)
    where
        F: FnOnce(TimeoutOutcome) + Send + 'static,
    {
        let (disarm, disarmed) = oneshot::channel();
        let seq = self.timer_seq.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut timer = self.timer.lock();
            self.expired.store(false, Ordering::SeqCst);
            timer.replace((seq, disarm))
        };
        drop(previous);

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut outcome = select! {
                _ = time::sleep(duration) => TimeoutOutcome::Expired,
                _ = disarmed => TimeoutOutcome::Disarmed,
            };

            if outcome == TimeoutOutcome::Expired {
                outcome = match weak.upgrade() {
                    Some(sock) if sock.expire(seq) => TimeoutOutcome::Expired,
                    _ => TimeoutOutcome::Disarmed,
                };
            }

            on_expire(outcome);
        });
    }

    /// Disarm the pending timeout, if any. Returns whether one was pending;
    /// `false` after an expiry, which this also clears.
    pub fn cancel_timeout(&self) -> bool {
        let mut timer = self.timer.lock();
        self.expired.store(false, Ordering::SeqCst);
        timer.take().is_some()
    }

    /// Whether a timeout is currently armed
    pub fn timeout_pending(&self) -> bool {
        self.timer.lock().is_some()
    }

    fn expire(&self, seq: u64) -> bool {
        let mut timer = self.timer.lock();
        match *timer {
            Some((current, _)) if current == seq => {
                timer.take();
                self.expired.store(true, Ordering::SeqCst);
                drop(timer);
                tracing::trace!("socket[{}]: timeout expired", self.remote);
                self.cancel();
                true
            }
            _ => false,
        }
    }

    /// Close the socket. Closing an already closed socket does nothing.
    pub async fn disconnect(&self, dc: Dc) -> Result<(), SocketError> {
        match dc {
            Dc::Fin => {
                if self
                    .state
                    .compare_exchange(OPEN, HALF_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Ok(());
                }
                self.cancel_timeout();

                let mut guard = self.writer.lock().await;
                if let Some(writer) = guard.as_mut() {
                    writer.shutdown().await?;
                }
                Ok(())
            }
            Dc::Rst => {
                if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
                    return Ok(());
                }
                self.cancel_timeout();
                self.cancel();

                let reader = self.reader.lock().await.take();
                let writer = self.writer.lock().await.take();

                if let (Some(reader), Some(writer)) = (reader, writer) {
                    let transport = reader.into_inner().unsplit(writer);
                    if let Err(e) = transport.set_abortive() {
                        tracing::debug!("socket[{}]: couldn't set abortive close: {}", self.remote, e);
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("remote", &self.remote)
            .field("local", &self.local)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
