use crate::{tag::TagHandle, Connector, HostPort, Opts, Out, Peer, RemoteConfig, RemoteError, Request, TcpConnector};

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use strand_network::invariant_violation;
use tokio::sync::oneshot;

/// The outbound side: every remote this server talks to, and the requests in
/// flight to each.
pub struct Remote {
    conf: Arc<RemoteConfig>,
    connector: Arc<dyn Connector>,
    peers: Mutex<HashMap<HostPort, Arc<Peer>>>,
    closed: AtomicBool,
}

impl Remote {
    pub fn new(conf: RemoteConfig) -> Self {
        Self::with_connector(conf, TcpConnector)
    }

    /// Open connections through `connector` instead of plain TCP
    pub fn with_connector(conf: RemoteConfig, connector: impl Connector) -> Self {
        Self {
            conf: Arc::new(conf),
            connector: Arc::new(connector),
            peers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn conf(&self) -> &RemoteConfig {
        &self.conf
    }

    /// Request options with this remote's configured defaults
    pub fn opts(&self) -> Opts {
        Opts {
            content_length_maxalloc: self.conf.content_length_maxalloc,
            ..Opts::default()
        }
    }

    /// Build a request using this remote's defaults
    pub fn request(&self, target: HostPort, out: Out) -> Request {
        Request::new(target, out).with_opts(self.opts())
    }

    /// The peer for `target`, if anything has been sent there
    pub fn peer(&self, target: &HostPort) -> Option<Arc<Peer>> {
        self.peers.lock().get(target).cloned()
    }

    /// The peer for `target`, created if need be. `None` once shut down.
    fn peer_for(&self, target: &HostPort) -> Option<Arc<Peer>> {
        let mut peers = self.peers.lock();
        // Under the lock: no peer is added once shutdown has drained the map
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let peer = peers.entry(target.clone()).or_insert_with(|| {
            Peer::new(
                target.clone(),
                Arc::clone(&self.conf),
                Arc::clone(&self.connector),
            )
        });
        Some(Arc::clone(peer))
    }

    /// Start a request. Returns straight away; the outcome is collected with
    /// [`Request::response`] or [`Request::wait`].
    ///
    /// A request can only be submitted once.
    pub fn submit(&self, request: &mut Request) {
        if request.is_submitted() {
            invariant_violation("request submitted twice");
            return;
        }
        request.mark_submitted();

        let (sender, receiver) = oneshot::channel();
        request.result = Some(receiver);

        let out = match request.out.take() {
            Some(out) => out,
            None => {
                let _ = sender.send(Err(RemoteError::NotSubmitted));
                return;
            }
        };

        let peer = match self.peer_for(request.target()) {
            Some(peer) => peer,
            None => {
                let _ = sender.send(Err(RemoteError::Shutdown));
                return;
            }
        };
        let input = request.input.take().unwrap_or_default();
        if let Some(id) = peer.submit(out, input, request.opts.clone(), sender) {
            request.tag = Some(TagHandle {
                peer: Arc::downgrade(&peer),
                id,
            });
        }
    }

    /// Cancel a submitted request. Returns `false` if it had already completed.
    pub fn cancel(&self, request: &mut Request) -> bool {
        request.cancel()
    }

    /// Fail everything in flight with [`RemoteError::Shutdown`], reset every
    /// connection, and refuse further requests.
    pub fn shutdown(&self) {
        let peers: Vec<_> = {
            let mut peers = self.peers.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            peers.drain().map(|(_, peer)| peer).collect()
        };
        tracing::debug!("remote: shutting down {} peers", peers.len());
        for peer in peers {
            peer.shutdown();
        }
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("peers", &self.peers.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
