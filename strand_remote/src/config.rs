use serde::{Deserialize, Serialize};
use std::time::Duration;
use strand_network::config::duration_secs;

/// Default cap on dynamically allocated response content
pub const DEFAULT_CONTENT_LENGTH_MAXALLOC: usize = 256 * 1024 * 1024;

/// Settings for outbound connections
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Connections kept open to one remote
    pub link_max: usize,
    /// Requests in flight on one connection
    pub pipeline_max: usize,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// How long an unused connection is kept
    #[serde(with = "duration_secs")]
    pub link_idle_timeout: Duration,
    /// Largest response head accepted, unless a request says otherwise
    pub head_max: usize,
    /// Request content is written in pieces of this size
    pub write_chunk: usize,
    /// Default for [`Opts::content_length_maxalloc`](crate::Opts)
    pub content_length_maxalloc: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            link_max: 2,
            pipeline_max: 1,
            connect_timeout: Duration::from_secs(30),
            link_idle_timeout: Duration::from_secs(60),
            head_max: 8 * 1024,
            write_chunk: 64 * 1024,
            content_length_maxalloc: DEFAULT_CONTENT_LENGTH_MAXALLOC,
        }
    }
}
