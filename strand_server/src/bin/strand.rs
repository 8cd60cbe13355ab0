use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab")]
struct Opts {
    /// Server config file location
    #[structopt(short, long)]
    server_conf: PathBuf,

    /// Run in foreground without daemonising
    #[structopt(short, long)]
    foreground: bool,
}

/// Main entry point.
///
/// Configuration is loaded and the process daemonised before the tokio
/// runtime exists; see [`strand_server::run::run_server`].
pub fn main() -> Result<(), anyhow::Error> {
    let opts = Opts::from_args();

    strand_server::run::run_server(opts.server_conf, opts.foreground)
}
