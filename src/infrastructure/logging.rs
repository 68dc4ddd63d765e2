//! Global tracing setup for the replay tool and embedding applications.

use crate::domain::settings::LogSettings;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target of the per-brand frame decoders, the chattiest part of the crate.
pub const DECODER_TARGET: &str = "euc_wheel_link::infrastructure::protocol";
/// Target of the keep-alive, reconnect and watchdog machinery.
pub const CONNECTION_TARGET: &str = "euc_wheel_link::infrastructure::connection";

pub struct LoggingGuard {
    // Dropping the guard flushes and stops the file writer
    _guards: Vec<WorkerGuard>,
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Filter directives for `settings`: the global level plus separate levels
/// for the decoders and the connection layer.
pub fn filter_directives(settings: &LogSettings) -> String {
    format!(
        "{},{}={},{}={}",
        settings.level,
        DECODER_TARGET,
        settings.decoder_level,
        CONNECTION_TARGET,
        settings.connection_level
    )
}

/// `RUST_LOG` wins; a malformed configuration falls back to the defaults.
fn build_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(settings)))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log levels in settings ({}), using defaults", e);
            EnvFilter::new(filter_directives(&LogSettings::default()))
        })
}

fn file_writer(settings: &LogSettings) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let appender = RollingFileAppender::builder()
        .rotation(rotation(&settings.rotation))
        .filename_prefix(&settings.file_name_prefix)
        .filename_suffix("log")
        .build(&settings.log_dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber.
///
/// Console output goes to stderr so stdout stays free for decoded data.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        let (writer, guard) = file_writer(settings)?;
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(build_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging at {} (decoders {}, connection {})",
        settings.level,
        settings.decoder_level,
        settings.connection_level
    );

    Ok(LoggingGuard { _guards: guards })
}
