//! Inbound client connections.
//!
//! A [`Listener`] accepts TCP connections and hands each one to a
//! [`ClientContext`], which wraps it in a [`Client`]. Each client then runs a
//! read-serve-reschedule cycle: wait for bytes under the idle timeout, parse
//! one or more requests, dispatch each to the [`Resource`] registered for its
//! path, and either schedule the next read or close.

pub mod id;
pub use id::*;

pub mod error;
pub use error::*;

pub mod config;
pub use config::*;

mod reader;
pub use reader::*;

mod client;
pub use client::*;

mod registry;
pub use registry::*;

mod resource;
pub use resource::*;

mod context;
pub use context::*;

mod listener;
pub use listener::*;
