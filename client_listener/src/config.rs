use serde::{Deserialize, Serialize};
use std::time::Duration;
use strand_network::config::duration_secs;

/// Settings for serving inbound clients
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig
{
    /// How long a connection may sit with nothing to read before it's closed
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// How long a client has to send a whole request once it starts
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Requests processed concurrently across all clients
    pub request_pool_size: usize,
    /// Per-connection read buffer; also the largest acceptable request head
    pub buffer_size: usize,
    /// Largest request content that will be read ahead of dispatch
    pub content_maxalloc: usize,
}

impl Default for ClientConfig
{
    fn default() -> Self
    {
        Self {
            idle_timeout: Duration::from_secs(3 * 60 * 60),
            request_timeout: Duration::from_secs(300),
            request_pool_size: 32,
            buffer_size: 8 * 1024,
            content_maxalloc: 1024 * 1024,
        }
    }
}
