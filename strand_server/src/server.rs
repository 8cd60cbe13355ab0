use crate::*;

use client_listener::{ClientContext, Listener, ListenerIdGenerator, ResourceRegistry};
use std::sync::Arc;
use strand_network::task::{self, TaskFailure};
use strand_remote::Remote;

/// A running server: the listeners, the clients they accept, and the
/// outbound side.
pub struct Server {
    clients: Arc<ClientContext>,
    remote: Arc<Remote>,
    listeners: Vec<Listener>,
}

impl Server {
    /// Build the server and start accepting on every configured listener.
    pub async fn new(conf: ServerConfig) -> anyhow::Result<Self> {
        if conf.debug_mode {
            task::set_critical_handler(abort_on_failure);
        }

        let remote = Arc::new(Remote::new(conf.remote));

        let resources = ResourceRegistry::new();
        let env = ResourceEnv {
            server_name: conf.server_name,
            remote: Arc::clone(&remote),
        };
        register_builtin(&resources, &env);

        let clients = ClientContext::new(conf.client, resources);

        let id_gen = ListenerIdGenerator::new(1);
        let mut listeners = Vec::new();
        for address in conf.listeners {
            let listener = Listener::bind(id_gen.next(), address, Arc::clone(&clients)).await?;
            listeners.push(listener);
        }

        Ok(Self {
            clients,
            remote,
            listeners,
        })
    }

    pub fn clients(&self) -> &Arc<ClientContext> {
        &self.clients
    }

    pub fn remote(&self) -> &Arc<Remote> {
        &self.remote
    }

    /// Addresses actually bound, in configuration order
    pub fn local_addresses(&self) -> Vec<std::net::SocketAddr> {
        self.listeners.iter().map(|l| l.address).collect()
    }

    /// Serve until the process is asked to stop.
    pub async fn run(&self) -> anyhow::Result<()> {
        wait_for_signal().await?;
        tracing::info!("Received shutdown signal");
        Ok(())
    }

    /// Stop accepting, reset every client, and fail everything in flight to
    /// remotes.
    pub async fn shutdown(self) {
        for listener in &self.listeners {
            if let Err(e) = listener.close().await {
                tracing::debug!("listener[{}]: {}", listener.id, e);
            }
        }

        self.clients.shutdown().await;
        self.remote.shutdown();
        tracing::info!("Shutdown complete");
    }
}

fn abort_on_failure(failure: &TaskFailure) {
    tracing::error!("{}", failure);
    eprintln!("Aborting on task failure: {}", failure);
    std::process::abort();
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
