use crate::config::*;
use tracing_subscriber::{
    prelude::*,
    filter::{filter_fn, Targets},
    Layer,
    registry::LookupSpan,
};
use tracing_core::LevelFilter;
use tracing::Subscriber;

use std::{
    io::{
        Error as IoError
    },
    path::Path,
};

/// Short names accepted in a log target's `modules`, and the crates they cover
const COMPONENTS: &[(&str, &[&str])] = &[
    ("inbound", &["client_listener"]),
    ("outbound", &["strand_remote"]),
    ("network", &["strand_network"]),
    ("server", &["strand_server", "strand"]),
    ("strand", &["strand_server", "strand", "client_listener", "strand_remote", "strand_network"]),
];

/// Dependencies that are quiet unless asked for. The console layer needs the
/// runtime's own instrumentation, so it lifts the first two.
const RUNTIME_TARGETS: &[&str] = &["tokio", "runtime"];
const QUIET_TARGETS: &[&str] = &["mio", "h2", "hyper", "tower", "tonic"];

fn expand_modules(modules: &[String]) -> Vec<String>
{
    let mut prefixes = Vec::new();
    for module in modules
    {
        match COMPONENTS.iter().find(|(name, _)| name == module)
        {
            Some((_, crates)) => prefixes.extend(crates.iter().map(|c| c.to_string())),
            None => prefixes.push(module.clone()),
        }
    }
    prefixes
}

fn build_target<S>(conf: LogEntry, dir: impl AsRef<Path>) -> Result<Box<dyn Layer<S> + Send + Sync + 'static>, IoError>
    where S: Subscriber + Send + Sync,
          for<'span> S: LookupSpan<'span>,
{
    let layer = match &conf.target
    {
        LogTarget::File { filename } =>
        {
            tracing_subscriber::fmt::layer()
                                     .with_writer(tracing_appender::rolling::daily(dir, filename))
                                     .with_ansi(false)
                                     .with_thread_names(true)
                                     .boxed()
        }
        LogTarget::Builtin(BuiltinLogTarget::Stdout) =>
        {
            tracing_subscriber::fmt::layer().with_writer(std::io::stdout).boxed()
        }
        LogTarget::Builtin(BuiltinLogTarget::Stderr) =>
        {
            tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_ansi(false).boxed()
        }
    };

    let level: LevelFilter = conf.level.map_or(LevelFilter::TRACE, Into::into);
    let prefixes = expand_modules(&conf.modules);

    let filter = filter_fn(move |metadata| {
        metadata.level() <= &level &&
            (
                prefixes.is_empty() ||
                    metadata.module_path().map_or(true, |module| prefixes.iter().any(|p| module.starts_with(p.as_str())))
            )
    });

    Ok(layer.with_filter(filter).boxed())
}

/// The process-wide filter. It only holds back dependencies; each log target
/// filters for itself on top of it. Configured module levels win over the
/// built-in ones.
fn global_filter(conf: &LoggingConfig) -> Targets
{
    let default = LevelFilter::from(conf.default_level.unwrap_or(LogLevel::Trace));
    let runtime = if conf.console_address.is_some() { LevelFilter::TRACE } else { LevelFilter::WARN };

    let builtin = RUNTIME_TARGETS.iter().map(|t| (t.to_string(), runtime))
                    .chain(QUIET_TARGETS.iter().map(|t| (t.to_string(), LevelFilter::WARN)))
                    .filter(|(t, _)| !conf.module_levels.contains_key(t));

    Targets::new()
        .with_default(default)
        .with_targets(builtin)
        .with_targets(conf.module_levels.iter().map(|(module, level)| (module.clone(), LevelFilter::from(*level))))
}

/// Assemble the process-wide subscriber: one layer per log target, each
/// with its own level and module filter.
pub fn build_subscriber(conf: LoggingConfig) -> Result<impl Subscriber, IoError>
{
    let filter = global_filter(&conf);
    let mut layers = Vec::new();

    for target in conf.targets
    {
        layers.push(build_target(target, &conf.dir)?);
    }

    let console = conf.console_address.map(|addr| console_subscriber::ConsoleLayer::builder().server_addr(addr).spawn());

    Ok(tracing_subscriber::registry()
            .with(console)
            .with(filter)
            .with(layers)
        )
}

#[cfg(test)]
mod tests
{
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing::Level;

    fn logging(extra: &str) -> LoggingConfig
    {
        let conf = format!(r#"{{ dir: "log/", "default-level": "debug", targets: [], {} }}"#, extra);
        json5::from_str(&conf).unwrap()
    }

    #[test]
    fn components_expand_to_crates()
    {
        let modules = vec!["outbound".to_string(), "json5".to_string()];
        assert_eq!(expand_modules(&modules), vec!["strand_remote".to_string(), "json5".to_string()]);
    }

    #[test]
    fn runtime_is_quiet_without_console()
    {
        let filter = global_filter(&logging(""));
        assert!(filter.would_enable("strand_remote::link", &Level::DEBUG));
        assert!(!filter.would_enable("strand_remote::link", &Level::TRACE));
        assert!(!filter.would_enable("tokio::task", &Level::DEBUG));
        assert!(filter.would_enable("tokio::task", &Level::WARN));
    }

    #[test]
    fn console_and_module_levels_lift_targets()
    {
        let filter = global_filter(&logging(r#""console-address": "127.0.0.1:9999", "module-levels": { "hyper": "info" }"#));
        assert!(filter.would_enable("tokio::task", &Level::TRACE));
        assert!(filter.would_enable("runtime::resource", &Level::TRACE));
        assert!(filter.would_enable("hyper::proto", &Level::INFO));
        assert!(!filter.would_enable("mio::poll", &Level::INFO));
    }
}
