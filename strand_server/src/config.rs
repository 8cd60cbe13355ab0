use client_listener::ClientConfig;
use strand_remote::RemoteConfig;

use std::collections::HashMap;
use std::net::SocketAddr;
use tracing_core::LevelFilter;
use std::{
    fs::File,
    io::Read,
    path::{
        Path,
        PathBuf,
    },
};

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(rename_all="lowercase")]
pub enum BuiltinLogTarget
{
    Stdout,
    Stderr,
}

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(untagged)]
pub enum LogTarget
{
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone,Copy,Debug,PartialEq,Eq,serde::Serialize,serde::Deserialize)]
#[serde(rename_all ="lowercase")]
pub enum LogLevel
{
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone,Debug,serde::Deserialize)]
pub struct LogEntry
{
    pub target: LogTarget,
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct LoggingConfig
{
    pub dir: PathBuf,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub default_level: Option<LogLevel>,
    #[serde(default)]
    pub module_levels: HashMap<String, LogLevel>,
    pub targets: Vec<LogEntry>,
    pub console_address: Option<SocketAddr>,
}

impl LoggingConfig
{
    pub fn prefix_file(&self, filename: impl AsRef<Path>) -> PathBuf
    {
        let mut path = self.dir.clone();
        path.push(filename);
        path
    }
}

/// Configuration for one server process
#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct ServerConfig
{
    /// Reported by the version resource
    pub server_name: String,
    /// Addresses to accept clients on
    pub listeners: Vec<SocketAddr>,
    /// Runtime worker threads; one per core if unset
    pub worker_threads: Option<usize>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    pub log: LoggingConfig,
    /// Abort the process on any task failure, instead of logging it
    #[serde(default)]
    pub debug_mode: bool,
}

impl ServerConfig
{
    /// Load configuration from a file
    pub fn load_file<P: AsRef<Path>>(filename: P) -> Result<Self, anyhow::Error>
    {
        let mut file = File::open(filename)?;
        let mut config = String::new();
        file.read_to_string(&mut config)?;
        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self, anyhow::Error>
    {
        Ok(json5::from_str(config)?)
    }
}

impl From<LogLevel> for LevelFilter
{
    fn from(arg: LogLevel) -> LevelFilter
    {
        match arg
        {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info  => LevelFilter::INFO,
            LogLevel::Warn  => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off   => LevelFilter::OFF,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const CONFIG: &str = r#"{
        // Comments are allowed
        "server-name": "strand.test",
        listeners: [ "127.0.0.1:8008", "[::1]:8008" ],
        client: {
            idle_timeout: 60,
            request_timeout: 2.5,
        },
        remote: {
            pipeline_max: 4,
        },
        log: {
            dir: "log/",
            "default-level": "debug",
            "module-levels": { "tokio": "warn" },
            targets: [
                { target: "stdout", level: "info", modules: [ "strand_server" ] },
                { target: { filename: "strand.log" } },
            ],
        },
    }"#;

    #[test]
    fn parse_server_config()
    {
        let conf = ServerConfig::parse(CONFIG).unwrap();

        assert_eq!(conf.server_name, "strand.test");
        assert_eq!(conf.listeners.len(), 2);
        assert_eq!(conf.worker_threads, None);
        assert!(!conf.debug_mode);

        assert_eq!(conf.client.idle_timeout, Duration::from_secs(60));
        assert_eq!(conf.client.request_timeout, Duration::from_millis(2500));
        assert_eq!(conf.client.request_pool_size, ClientConfig::default().request_pool_size);

        assert_eq!(conf.remote.pipeline_max, 4);
        assert_eq!(conf.remote.link_max, RemoteConfig::default().link_max);

        assert_eq!(conf.log.default_level, Some(LogLevel::Debug));
        assert_eq!(conf.log.module_levels.get("tokio"), Some(&LogLevel::Warn));
        assert!(matches!(conf.log.targets[0].target, LogTarget::Builtin(BuiltinLogTarget::Stdout)));
        assert!(matches!(&conf.log.targets[1].target, LogTarget::File { filename } if filename == Path::new("strand.log")));
        assert_eq!(conf.log.prefix_file("strand.pid"), PathBuf::from("log/strand.pid"));
    }

    #[test]
    fn negative_durations_are_rejected()
    {
        let config = CONFIG.replace("request_timeout: 2.5", "request_timeout: -1");
        assert!(ServerConfig::parse(&config).is_err());
    }
}
