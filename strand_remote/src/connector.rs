use crate::{HostPort, RemoteError};

use async_trait::async_trait;
use std::time::Duration;
use strand_network::{Socket, SocketError};
use tokio::net::lookup_host;

/// Opens transport connections to remotes
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, target: &HostPort, timeout: Duration) -> Result<Socket, RemoteError>;
}

/// Resolves names through the system resolver and connects over TCP
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &HostPort, timeout: Duration) -> Result<Socket, RemoteError> {
        let addrs: Vec<_> = lookup_host((target.host(), target.port()))
            .await
            .map_err(|e| RemoteError::Unavailable(format!("resolving {}: {}", target, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(RemoteError::Unavailable(format!("no addresses for {}", target)));
        }

        let mut last_error = SocketError::NotConnected;
        for addr in addrs {
            match Socket::connect(addr, timeout).await {
                Ok(sock) => return Ok(sock),
                Err(e) => {
                    tracing::debug!("connect to {} ({}) failed: {}", target, addr, e);
                    last_error = e;
                }
            }
        }
        Err(last_error.into())
    }
}
