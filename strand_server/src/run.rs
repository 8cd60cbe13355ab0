use crate::{Server, ServerConfig};

use std::{fs::File, path::Path};
use tracing_subscriber::util::SubscriberInitExt;

// The async entry point. Because `run_server` can fork into the background
// depending on options, it needs to initialise the tokio runtime after doing so
async fn do_run_server(server_config: ServerConfig) -> anyhow::Result<()> {
    crate::tracing_config::build_subscriber(server_config.log.clone())?.init();

    tracing::info!(
        "Starting {} version {}",
        server_config.server_name,
        env!("CARGO_PKG_VERSION")
    );

    let server = Server::new(server_config).await?;
    for address in server.local_addresses() {
        tracing::info!("Accepting clients on {}", address);
    }

    let result = server.run().await;
    server.shutdown().await;
    result
}

/// Run a server.
///
/// The configuration is loaded from `server_config_path` before anything
/// else, so that errors in it are reported on the terminal. Unless
/// `foreground` is set the process then daemonises, redirecting standard
/// output and error to the files named in the logging config, if any.
///
/// This creates a new tokio runtime. It should not be called if one is
/// already active.
pub fn run_server(server_config_path: impl AsRef<Path>, foreground: bool) -> anyhow::Result<()> {
    // NB: the tokio runtime can't survive forking, so the runtime is only
    // built after daemonising.
    let server_config = ServerConfig::load_file(&server_config_path)?;

    if !server_config.log.dir.is_dir() {
        std::fs::create_dir_all(&server_config.log.dir)?;
    }

    if !foreground {
        let mut daemon = daemonize::Daemonize::new()
            .working_directory(std::env::current_dir()?);

        if let Some(stdout) = &server_config.log.stdout {
            daemon = daemon.stdout(File::create(server_config.log.prefix_file(stdout))?);
        }
        if let Some(stderr) = &server_config.log.stderr {
            daemon = daemon.stderr(File::create(server_config.log.prefix_file(stderr))?);
        }
        if let Some(pidfile) = &server_config.log.pidfile {
            daemon = daemon.pid_file(server_config.log.prefix_file(pidfile));
        }

        daemon.start()?;
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("strand-worker");
    if let Some(threads) = server_config.worker_threads {
        builder.worker_threads(threads.max(1));
    }
    let runtime = builder.build()?;

    runtime.block_on(do_run_server(server_config))
}
