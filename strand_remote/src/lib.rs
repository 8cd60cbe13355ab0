//! Outbound requests to remote servers.
//!
//! Many logical [`Request`]s to one remote are carried over a few pooled
//! connections ("links"). Each submitted request gets a tag: its place in one
//! link's pipeline. Requests on a link are written one after another and
//! their responses are read back strictly in the order they were written.

mod error;
pub use error::*;

pub mod config;
pub use config::RemoteConfig;

mod host;
pub use host::*;

mod connector;
pub use connector::*;

mod request;
pub use request::*;

mod tag;
pub use tag::{TagId, TagState};

mod peer;
pub use peer::Peer;

mod link;

mod remote;
pub use remote::*;
