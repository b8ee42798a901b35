use anyhow::Context;
use pledge_service::config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over the config file;
/// each `-v` raises the level one step.
pub fn init_logging(config: &LoggingConfig, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let directives = match (&config.filter, verbose) {
        (Some(filter), 0) => filter.clone(),
        _ => format!("pledge={level},pledge_service={level},pledge_net={level},tower_http={level}"),
    };
    let filter = match std::env::var("RUST_LOG") {
        Ok(from_env) => EnvFilter::try_new(from_env),
        Err(_) => EnvFilter::try_new(&directives),
    }
    .with_context(|| format!("invalid log filter: {}", directives))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .try_init()?,
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(false))
            .try_init()?,
        LogFormat::Pretty => {
            let show_location = matches!(level, "debug" | "trace");
            subscriber
                .with(
                    fmt::layer()
                        .with_target(show_location)
                        .with_line_number(show_location)
                        .with_file(show_location),
                )
                .try_init()?
        }
    }

    Ok(())
}
