//! Unified logging module for station fleet services
//!
//! Console output uses a bracketed level format, file output rolls daily under
//! the configured log directory. The filter is reloadable at runtime.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::{Layered, SubscriberExt},
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Station CORS0001 connected`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Process-wide logging state installed by [`init_with_config`]
struct LoggingState {
    filter: reload::Handle<EnvFilter, Registry>,
    current: Mutex<String>,
    // Dropping a guard stops its non-blocking writer
    _file_guard: Option<WorkerGuard>,
}

static STATE: OnceLock<LoggingState> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Layered<reload::Layer<EnvFilter, Registry>, Registry>> + Send + Sync>;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the file prefix and as a filter target
    pub service_name: String,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// Default filter level when `RUST_LOG` is not set
    pub level: String,
    /// Write rolling log files in addition to the console
    pub enable_file: bool,
    /// JSON lines in the log file instead of the console format
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: PathBuf::from("logs"),
            level: "info".to_string(),
            enable_file: true,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Build the filter directive.
///
/// `RUST_LOG` wins when present; otherwise the configured level applies
/// globally and to the service's own target, with the MQTT client held at warn.
pub fn filter_spec(config: &LogConfig, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(env) if !env.trim().is_empty() => env.to_string(),
        _ => format!(
            "{level},{service}={level},rumqttc=warn",
            level = config.level,
            service = config.service_name.replace('-', "_")
        ),
    }
}

/// Daily-rolling file layer under `config.log_dir`
fn file_layer(config: &LogConfig) -> std::io::Result<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender =
        tracing_appender::rolling::daily(&config.log_dir, format!("{}.log", config.service_name));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };
    Ok((layer, guard))
}

/// Install the global subscriber: reloadable filter, console, optional file
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let spec = filter_spec(&config, std::env::var("RUST_LOG").ok().as_deref());
    let (filter, handle) = reload::Layer::new(EnvFilter::try_new(&spec)?);

    let mut layers: Vec<BoxedLayer> = vec![fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed()];
    let mut guard = None;
    if config.enable_file {
        let (layer, file_guard) = file_layer(&config)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()?;

    let _ = STATE.set(LoggingState {
        filter: handle,
        current: Mutex::new(spec.clone()),
        _file_guard: guard,
    });

    if config.enable_file {
        tracing::info!("Logging {} to {:?} ({})", config.service_name, config.log_dir, spec);
    } else {
        tracing::info!("Logging {} to console ({})", config.service_name, spec);
    }
    Ok(())
}

/// Replace the active filter.
///
/// Accepts a bare level (`"debug"`) or a full directive
/// (`"info,stationsrv=debug"`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let state = STATE.get().ok_or("logging not initialized")?;
    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("invalid log filter '{level}': {e}"))?;
    state
        .filter
        .reload(filter)
        .map_err(|e| format!("failed to reload log filter: {e}"))?;

    match state.current.lock() {
        Ok(mut current) => *current = level.to_string(),
        Err(poisoned) => *poisoned.into_inner() = level.to_string(),
    }
    tracing::info!("Log filter changed to {}", level);
    Ok(())
}

/// Active filter directive, `None` before initialization
pub fn get_log_level() -> Option<String> {
    STATE
        .get()
        .and_then(|state| state.current.lock().ok().map(|current| current.clone()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_filter_spec_uses_config_without_env() {
        let config = LogConfig {
            service_name: "stationsrv".to_string(),
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(
            filter_spec(&config, None),
            "debug,stationsrv=debug,rumqttc=warn"
        );
        assert_eq!(
            filter_spec(&config, Some("  ")),
            "debug,stationsrv=debug,rumqttc=warn"
        );
    }

    #[test]
    fn test_filter_spec_prefers_rust_log() {
        let config = LogConfig::default();
        assert_eq!(filter_spec(&config, Some("warn,hyper=off")), "warn,hyper=off");
    }

    #[test]
    fn test_set_log_level_before_init() {
        // No subscriber installed in this test binary
        assert!(get_log_level().is_none());
        assert!(set_log_level("debug").is_err());
    }
}
