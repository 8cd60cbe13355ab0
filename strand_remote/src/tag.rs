use crate::{In, Opts, Out, Peer, RemoteError, Response};

use std::sync::Weak;
use tokio::sync::oneshot;

/// A generation-checked reference to a tag slot.
///
/// Slots are reused once a tag is retired; the generation tells a stale
/// reference apart from the slot's current occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TagId {
    pub(crate) key: usize,
    pub(crate) generation: u64,
}

/// Where a tag is in its lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum TagState {
    /// Waiting for a link with room
    Pending,
    /// Attached to a link, not yet written
    Queued,
    Writing,
    /// Written in full; waiting for the response
    Written,
    Reading,
}

impl TagState {
    /// Whether any of the request may have reached the network
    pub fn on_wire(self) -> bool {
        matches!(self, Self::Writing | Self::Written | Self::Reading)
    }
}

pub(crate) type ResultSender = oneshot::Sender<Result<Response, RemoteError>>;

/// The pool's record of one in-flight request
pub(crate) struct TagSlot {
    pub generation: u64,
    pub state: TagState,
    pub link: Option<u64>,
    pub out: Option<Out>,
    pub input: Option<In>,
    pub opts: Opts,
    pub result: Option<ResultSender>,
}

impl TagSlot {
    /// Resolve the request, unless someone already did
    pub fn resolve(&mut self, result: Result<Response, RemoteError>) {
        if let Some(sender) = self.result.take() {
            // The request may have been dropped already
            let _ = sender.send(result);
        }
    }
}

/// A request's owning reference to its tag
#[derive(Debug)]
pub(crate) struct TagHandle {
    pub peer: Weak<Peer>,
    pub id: TagId,
}

impl TagHandle {
    pub fn cancel(&self) -> bool {
        match self.peer.upgrade() {
            Some(peer) => peer.cancel(self.id),
            None => false,
        }
    }

    pub fn state(&self) -> Option<TagState> {
        self.peer.upgrade().and_then(|peer| peer.tag_state(self.id))
    }
}
