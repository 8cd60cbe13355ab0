use crate::{
    link::Link,
    tag::{ResultSender, TagSlot},
    Connector, HostPort, In, Opts, Out, RemoteConfig, RemoteError, Response, TagId, TagState,
};

use parking_lot::Mutex;
use slab::Slab;
use std::{collections::VecDeque, sync::Arc};
use strand_network::{http::HttpError, invariant_violation, task};

/// How a link's outstanding requests are settled when it goes away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkFailure {
    /// The link never connected
    Connect,
    /// The link was open and broke, or was closed by the remote
    Broken,
}

/// What the reading side of a link should do next
pub(crate) enum Front {
    /// The link was removed from the peer
    Gone,
    /// Nothing outstanding
    Idle,
    /// The oldest request isn't fully written yet
    Waiting,
    /// The oldest request is written; read its response
    Ready {
        id: TagId,
        input: In,
        content_length_maxalloc: usize,
    },
}

struct LinkEntry {
    id: u64,
    link: Arc<Link>,
    /// Requests on this link, oldest first. Responses arrive in this order.
    queue: VecDeque<TagId>,
    /// The remote said it will close after the current response
    closing: bool,
}

#[derive(Default)]
struct PeerState {
    tags: Slab<TagSlot>,
    next_generation: u64,
    pending: VecDeque<TagId>,
    links: Vec<LinkEntry>,
    next_link_id: u64,
    closed: bool,
}

impl PeerState {
    fn slot(&self, id: TagId) -> Option<&TagSlot> {
        self.tags.get(id.key).filter(|s| s.generation == id.generation)
    }

    fn slot_mut(&mut self, id: TagId) -> Option<&mut TagSlot> {
        self.tags
            .get_mut(id.key)
            .filter(|s| s.generation == id.generation)
    }

    fn take_slot(&mut self, id: TagId) -> Option<TagSlot> {
        self.slot(id)?;
        Some(self.tags.remove(id.key))
    }

    fn entry_mut(&mut self, link_id: u64) -> Option<&mut LinkEntry> {
        self.links.iter_mut().find(|l| l.id == link_id)
    }

    fn take_entry(&mut self, link_id: u64) -> Option<LinkEntry> {
        let index = self.links.iter().position(|l| l.id == link_id)?;
        Some(self.links.remove(index))
    }

    fn resolve(&mut self, id: TagId, result: Result<Response, RemoteError>) {
        if let Some(mut slot) = self.take_slot(id) {
            slot.resolve(result);
        }
    }

    /// Fail every request on a link that is going away with
    /// [`RemoteError::ConnectionReset`], whether or not it was written.
    fn reset_all(&mut self, ids: impl IntoIterator<Item = TagId>) {
        for id in ids {
            self.resolve(id, Err(RemoteError::ConnectionReset));
        }
    }
}

/// All outbound requests to one remote, and the links carrying them.
///
/// Requests wait in a pending queue until a link has room. A link carries at
/// most `pipeline_max` requests at once and responses are matched to them in
/// the order they were written. At most `link_max` links are opened.
pub struct Peer {
    pub(crate) target: HostPort,
    pub(crate) conf: Arc<RemoteConfig>,
    pub(crate) connector: Arc<dyn Connector>,
    state: Mutex<PeerState>,
}

impl Peer {
    pub(crate) fn new(
        target: HostPort,
        conf: Arc<RemoteConfig>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            conf,
            connector,
            state: Mutex::new(PeerState::default()),
        })
    }

    pub fn target(&self) -> &HostPort {
        &self.target
    }

    /// Requests submitted and not yet resolved
    pub fn outstanding(&self) -> usize {
        self.state.lock().tags.len()
    }

    /// Requests waiting for a link
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Links open or opening
    pub fn links(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn tag_state(&self, id: TagId) -> Option<TagState> {
        self.state.lock().slot(id).map(|s| s.state)
    }

    /// Queue a request. Returns `None` if the peer is shut down, in which case
    /// the request has already been resolved.
    pub(crate) fn submit(
        self: &Arc<Self>,
        out: Out,
        input: In,
        opts: Opts,
        result: ResultSender,
    ) -> Option<TagId> {
        let mut state = self.state.lock();
        if state.closed {
            let _ = result.send(Err(RemoteError::Shutdown));
            return None;
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let key = state.tags.insert(TagSlot {
            generation,
            state: TagState::Pending,
            link: None,
            out: Some(out),
            input: Some(input),
            opts,
            result: Some(result),
        });
        let id = TagId { key, generation };

        tracing::trace!("remote[{}]: tag {:?} submitted", self.target, id);
        state.pending.push_back(id);
        self.dispatch(&mut state);
        Some(id)
    }

    /// Move pending requests onto links with room, opening links as allowed.
    fn dispatch(self: &Arc<Self>, state: &mut PeerState) {
        if state.closed {
            return;
        }
        let pipeline_max = self.conf.pipeline_max.max(1);
        let link_max = self.conf.link_max.max(1);

        while let Some(&id) = state.pending.front() {
            let best = state
                .links
                .iter()
                .enumerate()
                .filter(|(_, l)| !l.closing && l.queue.len() < pipeline_max)
                .min_by_key(|(_, l)| l.queue.len())
                .map(|(index, _)| index);

            let index = match best {
                Some(index) => index,
                None if state.links.iter().filter(|l| !l.closing).count() < link_max => {
                    self.open_link(state)
                }
                None => break,
            };

            state.pending.pop_front();
            let link_id = state.links[index].id;
            match state.slot_mut(id) {
                Some(slot) => {
                    slot.state = TagState::Queued;
                    slot.link = Some(link_id);
                }
                None => {
                    invariant_violation("pending request with no tag");
                    continue;
                }
            }

            let entry = &mut state.links[index];
            entry.queue.push_back(id);
            entry.link.notify_write.notify_one();
        }
    }

    fn open_link(self: &Arc<Self>, state: &mut PeerState) -> usize {
        let id = state.next_link_id;
        state.next_link_id += 1;

        let link = Arc::new(Link::new(id, format!("{}#{}", self.target, id)));
        tracing::debug!("remote[{}]: opening link {}", self.target, id);

        state.links.push(LinkEntry {
            id,
            link: Arc::clone(&link),
            queue: VecDeque::new(),
            closing: false,
        });

        let peer = Arc::clone(self);
        task::spawn(format!("remote-link {}", link.label()), move |_task| {
            link.run(peer)
        });

        state.links.len() - 1
    }

    /// Cancel a request. Returns `false` if it had already completed.
    ///
    /// A request that hasn't touched the network is simply removed. One that
    /// has may have left a partial request or response on its link, so the
    /// link is reset and every other request queued on it fails with
    /// [`RemoteError::ConnectionReset`]. Retrying those is up to the caller.
    pub(crate) fn cancel(self: &Arc<Self>, id: TagId) -> bool {
        let mut state = self.state.lock();
        let (tag_state, link_id) = match state.slot(id) {
            Some(slot) => (slot.state, slot.link),
            None => return false,
        };

        match (tag_state, link_id) {
            (TagState::Pending, _) => {
                state.pending.retain(|t| *t != id);
            }
            (TagState::Queued, Some(link_id)) => {
                if let Some(entry) = state.entry_mut(link_id) {
                    entry.queue.retain(|t| *t != id);
                }
            }
            (_, Some(link_id)) => {
                if let Some(entry) = state.take_entry(link_id) {
                    tracing::debug!(
                        "remote[{}]: resetting link {} for canceled request",
                        self.target,
                        link_id
                    );
                    state.reset_all(entry.queue.into_iter().filter(|t| *t != id));
                    entry.link.abort();
                }
            }
            (_, None) => invariant_violation("request on the wire with no link"),
        }

        state.resolve(id, Err(RemoteError::Canceled));
        self.dispatch(&mut state);
        true
    }

    /// The next request to write on a link, marked as being written
    pub(crate) fn next_write(&self, link_id: u64) -> Option<(TagId, Out)> {
        let mut state = self.state.lock();
        let PeerState { links, tags, .. } = &mut *state;

        let entry = links.iter().find(|l| l.id == link_id)?;
        for &id in &entry.queue {
            let slot = match tags.get_mut(id.key) {
                Some(slot) if slot.generation == id.generation => slot,
                _ => continue,
            };
            if slot.state == TagState::Queued {
                let out = slot.out.take()?;
                slot.state = TagState::Writing;
                return Some((id, out));
            }
        }
        None
    }

    pub(crate) fn written(&self, id: TagId) {
        if let Some(slot) = self.state.lock().slot_mut(id) {
            slot.state = TagState::Written;
        }
    }

    /// What the oldest request on a link needs from the reader
    pub(crate) fn front(&self, link_id: u64) -> Front {
        let mut state = self.state.lock();
        let id = match state.entry_mut(link_id) {
            Some(entry) => match entry.queue.front() {
                Some(&id) => id,
                None => return Front::Idle,
            },
            None => return Front::Gone,
        };

        match state.slot_mut(id) {
            Some(slot) if slot.state == TagState::Written => {
                slot.state = TagState::Reading;
                Front::Ready {
                    id,
                    input: slot.input.take().unwrap_or_default(),
                    content_length_maxalloc: slot.opts.content_length_maxalloc,
                }
            }
            Some(_) => Front::Waiting,
            None => {
                invariant_violation("link queue holds a retired tag");
                Front::Gone
            }
        }
    }

    /// Whether a link has nothing outstanding
    pub(crate) fn is_idle(&self, link_id: u64) -> bool {
        self.state
            .lock()
            .links
            .iter()
            .find(|l| l.id == link_id)
            .map_or(true, |l| l.queue.is_empty())
    }

    /// Deliver the response to the oldest request on a link. `keep_alive`
    /// false means the remote will close the link after it.
    pub(crate) fn complete(
        self: &Arc<Self>,
        link_id: u64,
        id: TagId,
        response: Response,
        keep_alive: bool,
    ) {
        let mut state = self.state.lock();
        match state.entry_mut(link_id) {
            Some(entry) if entry.queue.front() == Some(&id) => {
                entry.queue.pop_front();
                entry.closing |= !keep_alive;
            }
            _ => return,
        }

        if let Some(mut slot) = state.take_slot(id) {
            let code = response.code();
            let result = if slot.opts.http_exceptions && !code.is_success() {
                let content = String::from_utf8_lossy(&response.content).into_owned();
                Err(RemoteError::Http(HttpError::new(code, content)))
            } else {
                Ok(response)
            };
            tracing::trace!("remote[{}]: tag {:?} completed: {}", self.target, id, code);
            slot.resolve(result);
        }

        self.dispatch(&mut state);
    }

    /// Remove a link with nothing outstanding. Returns `false`, keeping the
    /// link, if requests arrived for it in the meantime.
    pub(crate) fn try_retire(&self, link_id: u64) -> bool {
        let mut state = self.state.lock();
        match state.links.iter().position(|l| l.id == link_id) {
            Some(index) if state.links[index].queue.is_empty() => {
                state.links.remove(index);
                tracing::debug!("remote[{}]: link {} retired", self.target, link_id);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Settle everything on a link that has gone away.
    ///
    /// If the link never connected its requests fail with `err`, as do the
    /// pending ones when there's no other link left to carry them. A broken
    /// link fails the request it was answering with `err` and every other
    /// request queued on it with [`RemoteError::ConnectionReset`]. Nothing is
    /// retried.
    pub(crate) fn fail_link(self: &Arc<Self>, link_id: u64, err: RemoteError, failure: LinkFailure) {
        let mut state = self.state.lock();
        let entry = match state.take_entry(link_id) {
            Some(entry) => entry,
            None => return,
        };
        tracing::debug!("remote[{}]: link {} failed: {}", self.target, link_id, err);

        match failure {
            LinkFailure::Connect => {
                for id in entry.queue {
                    state.resolve(id, Err(err.clone()));
                }
                if state.links.is_empty() {
                    let pending: Vec<_> = state.pending.drain(..).collect();
                    for id in pending {
                        state.resolve(id, Err(err.clone()));
                    }
                }
            }
            LinkFailure::Broken => {
                let mut queue = entry.queue.into_iter();
                if let Some(front) = queue.next() {
                    let on_wire = state.slot(front).map_or(false, |s| s.state.on_wire());
                    let result = if on_wire { err.clone() } else { RemoteError::ConnectionReset };
                    state.resolve(front, Err(result));
                }
                state.reset_all(queue);
            }
        }

        self.dispatch(&mut state);
    }

    /// Fail everything with [`RemoteError::Shutdown`] and reset every link.
    /// Later submissions are refused.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();

        for entry in state.links.drain(..) {
            entry.link.abort();
        }
        for mut slot in state.tags.drain() {
            slot.resolve(Err(RemoteError::Shutdown));
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("target", &self.target)
            .finish()
    }
}
