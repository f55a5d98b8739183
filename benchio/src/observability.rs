//! Log output for the benchmark binary.

use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{Config, LogFormat};

/// Installs the global subscriber writing to stderr in the configured format.
///
/// Stdout is reserved for the parameter summary and the reports.
pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config.logging.level);

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let layer = match format {
        LogFormat::Json => layer.json().with_filter(level).boxed(),
        LogFormat::Simplified => layer
            .compact()
            .with_ansi(false)
            .without_time()
            .with_filter(level)
            .boxed(),
        _ => layer.with_filter(level).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();
}

/// Resolves the maximum log level and the per-crate filter.
///
/// A `RUST_LOG` holding a plain level (including `off`) replaces `default`. Any other `RUST_LOG`
/// is used verbatim as the filter.
pub fn parse_rust_log(default: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => default,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        aws_smithy_runtime=WARN,\
        aws_config=WARN,\
        hyper=WARN,\
        benchio=TRACE,\
        ",
    );

    (level, env_filter)
}
