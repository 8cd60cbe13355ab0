//! Shared networking core: the task substrate, the socket abstraction and
//! HTTP head framing used by both the inbound and the outbound side.

mod error;
pub use error::*;

pub mod config;

pub mod socket;
pub use socket::{Dc, Socket, TimeoutOutcome, Transport};

pub mod task;
pub use task::{Concurrent, TaskContext, TaskHandle, TaskPool};

pub mod http;
