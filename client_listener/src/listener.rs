use crate::*;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use strand_network::{task, Socket, TaskContext};
use tokio::{
    net::TcpListener,
    select,
    sync::mpsc::{channel, Receiver, Sender},
};

/// Messages to a listener's accept loop
#[derive(Debug)]
pub enum ListenerControl
{
    Close,
}

/// A listening TCP socket feeding accepted connections to a [`ClientContext`].
///
/// Dropping the `Listener` stops accepting; clients already accepted are
/// unaffected.
pub struct Listener
{
    pub id: ListenerId,
    pub address: SocketAddr,
    control_channel: Sender<ListenerControl>,
}

impl Listener
{
    pub async fn bind(id: ListenerId, address: SocketAddr, ctx: Arc<ClientContext>) -> Result<Self, ListenerError>
    {
        let listener = TcpListener::bind(address).await?;
        let address = listener.local_addr()?;
        let (control_send, control_receive) = channel(128);

        tracing::info!("listener[{}]: listening on {}", id, address);

        task::spawn(format!("listener-{}", id), move |task| {
            Self::listen_loop(task, listener, control_receive, id, ctx)
        });

        Ok(Self {
            id,
            address,
            control_channel: control_send,
        })
    }

    /// Stop accepting connections
    pub async fn close(&self) -> Result<(), ListenerError>
    {
        self.control_channel.send(ListenerControl::Close).await.map_err(|_| ListenerError::Shutdown)
    }

    #[tracing::instrument(skip(task, listener, control_channel, ctx))]
    async fn listen_loop(
        task: TaskContext,
        listener: TcpListener,
        mut control_channel: Receiver<ListenerControl>,
        listener_id: ListenerId,
        ctx: Arc<ClientContext>,
    ) -> anyhow::Result<()>
    {
        let id_gen = ConnectionIdGenerator::new(listener_id, 1);

        loop
        {
            select! {
                res = listener.accept() => {
                    match res {
                        Ok((stream, _)) =>
                        {
                            if let Err(e) = stream.set_nodelay(true)
                            {
                                tracing::debug!("listener[{}]: couldn't set nodelay: {}", listener_id, e);
                            }
                            ctx.add_client(id_gen.next(), Socket::new(stream));
                        },
                        Err(e) =>
                        {
                            tracing::warn!("listener[{}]: error accepting connection: {}", listener_id, e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                },
                control = control_channel.recv() => {
                    match control {
                        None => break,
                        Some(ListenerControl::Close) => break,
                    }
                },
                _ = task.interruption() => break,
            }
        }

        tracing::info!("listener[{}]: closed", listener_id);
        Ok(())
    }
}

impl Drop for Listener
{
    fn drop(&mut self)
    {
        // Already closed if the loop has gone away
        let _ = self.control_channel.try_send(ListenerControl::Close);
    }
}
