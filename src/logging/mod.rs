//! Logging infrastructure - structured tracing for the bridge
//!
//! Design: `tracing` events with a fixed `event` field so release paths can be
//! filtered and counted from the log alone:
//! - Per-target filtering through `EnvFilter`
//! - Console output, optionally JSON
//! - Optional non-blocking file output via `tracing-appender`

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::handle::Handle;

pub use tracing::{debug, error, info, trace, warn};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the file writer thread alive for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// JSON lines instead of human-readable output
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TAK_INTEROP_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("TAK_INTEROP_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // TAK_INTEROP_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("TAK_INTEROP_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("TAK_INTEROP_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TAK_INTEROP_LOG_SPANS").is_ok();

        config
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Everything, including span enter/exit
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("tak_interop.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

pub(crate) fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration (first call wins)
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "tak_interop={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);

        let console: BoxedLayer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        };
        layers.push(console);

        if let Some(path) = config.log_path.as_deref().filter(|_| config.file_output) {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "tak_interop.log".into());

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let _ = FILE_GUARD.set(guard);

            layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events)
                    .with_target(true)
                    .boxed(),
            );
        }

        // Another subscriber may already be installed by the host application
        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .ok();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific events
// ============================================================================

/// Binding installed for a managed type
pub fn log_binding_register(type_name: &str) {
    debug!(
        target: "tak_interop::interop",
        event = "binding_register",
        type_name,
        "Binding registered"
    );
}

/// Native handle wrapped into a proxy
#[inline]
pub fn log_wrap(type_name: &str, handle: Handle) {
    trace!(
        target: "tak_interop::interop",
        event = "wrap",
        type_name,
        address = handle.address(),
        owns = handle.owns(),
        "Handle wrapped"
    );
}

/// Registration armed for a handle
#[inline]
pub fn log_register(id: u64, handle: Handle) {
    trace!(
        target: "tak_interop::peer",
        event = "register",
        registration = id,
        address = handle.address(),
        "Peer registration armed"
    );
}

/// Native resource released; `path` is "dispose" or "reclaim"
#[inline]
pub fn log_release(id: u64, handle: Handle, path: &'static str) {
    debug!(
        target: "tak_interop::peer",
        event = "release",
        registration = id,
        address = handle.address(),
        path,
        "Native peer released"
    );
}

/// Cleaner received an opaque payload alongside the handle
pub fn log_cleaner_warning(id: u64, handle: Handle) {
    warn!(
        target: "tak_interop::peer",
        event = "cleaner_opaque",
        registration = id,
        address = handle.address(),
        "Cleaner invoked with a non-null opaque payload; proxy leaked state into its cleaner"
    );
}

/// Proxy built without keeping its peer; it will be reclaimed while in use
pub fn log_unretained_warning(handle: Handle) {
    warn!(
        target: "tak_interop::interop",
        event = "peer_unretained",
        address = handle.address(),
        "Wrapped proxy did not keep its peer; native resource queued for release"
    );
}

/// Invariant violation surfaced to the caller
pub fn log_invariant_violation(what: &str, handle: Handle) {
    error!(
        target: "tak_interop::peer",
        event = "invariant_violation",
        what,
        address = handle.address(),
        "Native peer invariant violated"
    );
}

/// Factory registered in an SPI table
pub fn log_spi_register(registry: &str, name: &str) {
    debug!(
        target: "tak_interop::spi",
        event = "spi_register",
        registry,
        name,
        "Factory registered"
    );
}

/// Error reported across the C boundary
pub fn log_ffi_error(function: &str, error: &str) {
    error!(
        target: "tak_interop::ffi",
        event = "ffi_error",
        function,
        error,
        "FFI call failed"
    );
}

/// Current context changed on this thread
#[inline]
pub fn log_context_switch(handle: Handle) {
    trace!(
        target: "tak_interop::context",
        event = "context_switch",
        address = handle.address(),
        "Current native context set"
    );
}
