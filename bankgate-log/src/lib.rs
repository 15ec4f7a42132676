//! Bankgate Logging
//!
//! Installs the process-wide `tracing` subscriber used by every bankgate
//! crate. Library code logs through the plain `tracing` macros with
//! structured fields; this crate only decides where and how those events
//! are rendered.
//!
//! # Usage
//!
//! ```rust
//! bankgate_log::init();
//!
//! tracing::info!(bank = "SEP", "gateway ready");
//! ```
//!
//! # Environment Variables
//!
//! - `BANKGATE_DEBUG=1` - Enable debug logging
//! - `BANKGATE_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `BANKGATE_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `BANKGATE_LOG_COLOR=1|0` - Enable/disable colors
//! - `BANKGATE_LOG_MODULE=1|0` - Include the event target
//!
//! `RUST_LOG` takes precedence over the level derived from the variables above.

use once_cell::sync::Lazy;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of events that reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
    /// One JSON object per event
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

static INSTALLED: AtomicBool = AtomicBool::new(false);

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Build the configuration from `BANKGATE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("BANKGATE_DEBUG").unwrap_or(false);

        let mut level = lookup("BANKGATE_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(Level::Info);
        if debug && level > Level::Debug {
            level = Level::Debug;
        }

        let format = lookup("BANKGATE_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("BANKGATE_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let module_path = flag("BANKGATE_LOG_MODULE").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            module_path,
        }
    }

    /// Filter directive used when `RUST_LOG` is not set.
    pub fn filter_directive(&self) -> &'static str {
        self.level.as_directive()
    }
}

/// The configuration read from the environment on first use.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Whether a subscriber was installed by this crate.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

// ============================================================================
// Subscriber installation
// ============================================================================

/// Install the global subscriber. Later calls do nothing.
pub fn init() {
    let _ = try_init();
}

/// Install the global subscriber.
///
/// Returns `true` when this call installed it, `false` when a subscriber
/// (from this crate or elsewhere) was already in place.
pub fn try_init() -> bool {
    if is_installed() {
        return false;
    }
    let installed = install(config());
    if installed {
        INSTALLED.store(true, Ordering::SeqCst);
        tracing::debug!(
            level = %config().level,
            format = ?config().format,
            "logging initialized"
        );
    }
    installed
}

fn install(config: &LogConfig) -> bool {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        #[cfg(feature = "json")]
        Format::Json => registry
            .with(fmt::layer().json().with_target(config.module_path))
            .try_init(),
        Format::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_target(config.module_path),
            )
            .try_init(),
        #[allow(unreachable_patterns)]
        _ => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_target(config.module_path),
            )
            .try_init(),
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("WARNING"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("verbose"), None);
        assert_eq!(Level::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("Pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert!(!config.debug);
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.module_path);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[
            ("BANKGATE_DEBUG", "true"),
            ("BANKGATE_LOG_LEVEL", "error"),
        ]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("BANKGATE_DEBUG", "1"),
            ("BANKGATE_LOG_LEVEL", "trace"),
        ]));
        assert_eq!(config.level, Level::Trace);
    }

    #[test]
    fn test_color_detection() {
        let config = LogConfig::from_lookup(lookup(&[("TERM", "xterm")]));
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[("TERM", "xterm"), ("NO_COLOR", "1")]));
        assert!(!config.color);

        let config = LogConfig::from_lookup(lookup(&[("BANKGATE_LOG_COLOR", "1")]));
        assert!(config.color);
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        assert!(!try_init());
        tracing::info!(target: "bankgate::test", "still logging");
    }
}
