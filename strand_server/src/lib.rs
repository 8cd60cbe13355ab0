//! Process host: configuration, logging, the runtime, and the built-in
//! resources served by every instance.

pub mod config;
pub use config::ServerConfig;

mod tracing_config;
pub use tracing_config::build_subscriber;

mod resources;
pub use resources::*;

mod server;
pub use server::*;

pub mod run;
