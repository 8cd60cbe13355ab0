use crate::*;

use std::sync::Arc;
use strand_network::{Dc, Socket, TaskPool};

/// Everything the clients of one server share
pub struct ClientContext
{
    pub conf: ClientConfig,
    pub registry: ClientRegistry,
    pub resources: ResourceRegistry,
    pub pool: TaskPool,
}

impl ClientContext
{
    pub fn new(conf: ClientConfig, resources: ResourceRegistry) -> Arc<Self>
    {
        let pool = TaskPool::new("request", 0);
        pool.add(conf.request_pool_size);

        Arc::new(Self {
            conf,
            registry: ClientRegistry::new(),
            resources,
            pool,
        })
    }

    /// Take ownership of a newly connected socket and start serving it.
    pub fn add_client(self: &Arc<Self>, id: ConnectionId, sock: Socket) -> Arc<Client>
    {
        let client = Arc::new(Client::new(id, Some(sock), Arc::clone(self)));
        self.registry.register(&client);
        tracing::debug!("client[{}]: accepted as {}", client.remote(), id);

        client.async_recv_next(self.conf.idle_timeout);
        client
    }

    /// Stop serving: interrupt in-progress requests and reset every client.
    pub async fn shutdown(&self)
    {
        self.pool.interrupt();
        self.registry.disconnect_all(Dc::Rst).await;
    }
}
