use crate::*;

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use strand_network::{Concurrent, Dc};

/// Width of the fan-out used to close every client at once
const BROADCAST_WIDTH: usize = 64;

/// Every live client connection in the process.
///
/// Populated as clients are accepted and drained as they close. The lock is
/// only ever held to change or copy the membership; anything that touches a
/// client's socket happens after it's released.
#[derive(Default)]
pub struct ClientRegistry
{
    clients: Mutex<HashMap<ConnectionId, Weak<Client>>>,
}

impl ClientRegistry
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn register(&self, client: &Arc<Client>)
    {
        if self.clients.lock().insert(client.id, Arc::downgrade(client)).is_some()
        {
            tracing::warn!("client {} registered twice", client.id);
        }
    }

    /// Remove a client. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool
    {
        self.clients.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize
    {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.clients.lock().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool
    {
        self.clients.lock().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Client>>
    {
        self.clients.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Call `f` for every live client.
    pub fn for_each_broadcast(&self, mut f: impl FnMut(Arc<Client>))
    {
        for client in self.snapshot()
        {
            f(client);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Client>>
    {
        self.clients.lock().values().filter_map(Weak::upgrade).collect()
    }

    /// Close every live client, a bounded number at a time.
    pub async fn disconnect_all(&self, dc: Dc)
    {
        let clients = self.snapshot();
        tracing::info!("Disconnecting {} clients", clients.len());

        let mut fanout = Concurrent::<()>::new("client-disconnect", BROADCAST_WIDTH);
        for client in clients
        {
            let submitted = fanout.submit(move |slot| async move {
                let _slot = slot;
                client.close(dc).await;
                Ok(())
            }).await;

            if let Err(e) = submitted
            {
                tracing::error!("Error scheduling client disconnect: {}", e);
            }
        }

        if let Err(e) = fanout.wait_done().await
        {
            tracing::error!("Error disconnecting clients: {}", e);
        }
    }
}
