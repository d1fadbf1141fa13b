use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Keeps the file writer alive so buffered lines get flushed
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

/// Pick the filter: RUST_LOG, then the command line, then the settings file
fn level_filter(settings: &LogSettings, level_override: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level_override.unwrap_or(&settings.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logger(settings: &LogSettings, level_override: Option<&str>) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // Console goes to stderr so read dumps on stdout stay clean
    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_names(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            rotation(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_names(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(settings, level_override))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("Logging initialized");

    Ok(LoggingGuard { _guards: guards })
}
