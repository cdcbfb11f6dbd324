//! Logging infrastructure for linefan.
//!
//! All diagnostics go to stderr in a compact single-line format. Stdout is
//! never touched: worker processes inherit it and their output must pass
//! through unmixed.
//!
//! # Environment Variables
//!
//! - `LINEFAN_LOG` - Log filter (overrides RUST_LOG)
//! - `LINEFAN_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: WARN)
    pub level: Level,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: false)
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            filter: None,
            show_target: false,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set a custom filter string.
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Show or hide the target module path in log lines.
    pub fn with_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// Reads from:
    /// - `LINEFAN_LOG` or `RUST_LOG` for filter (only if filter not already set)
    /// - `LINEFAN_LOG_LEVEL` for level (only if filter not already set)
    ///
    /// A filter that is already set wins; env vars won't override it.
    pub fn with_env_overrides(mut self) -> Self {
        // LINEFAN_LOG takes precedence over RUST_LOG for filter
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("LINEFAN_LOG").or_else(|_| std::env::var("RUST_LOG"))
            {
                return self.with_filter(filter);
            }
        }

        // LINEFAN_LOG_LEVEL overrides level (only if no filter is set)
        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("LINEFAN_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        self
    }

    /// Build the EnvFilter for this configuration.
    fn build_filter(&self) -> EnvFilter {
        if let Some(ref filter) = self.filter {
            EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                EnvFilter::new(format!("{}", self.level).to_lowercase())
            })
        } else {
            EnvFilter::new(format!("{}", self.level).to_lowercase())
        }
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup. Subsequent calls are
/// silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let layer = fmt::layer()
        .compact()
        .with_target(config.show_target)
        .with_writer(std::io::stderr);

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();

    // Silently ignore if already initialized (idempotent)
    let _ = result;
}
