//! Logging setup for the `OxRT` object runtime.
//!
//! The runtime emits structured events through [`tracing`]. This crate owns the
//! subscriber side: it re-exports the macros the runtime uses, parses log
//! levels, and installs a `tracing-subscriber` formatter configured from the
//! environment.
//!
//! # Example
//!
//! ```
//! use oxrt_log::{LogConfig, Level, info};
//!
//! let config = LogConfig::default().with_level(Level::DEBUG);
//! oxrt_log::init(&config);
//!
//! let classes = 3;
//! info!(classes, "runtime ready");
//! ```
//!
//! # Environment
//!
//! [`LogConfig::from_env`] reads:
//!
//! - `OXRT_LOG`: an `EnvFilter` directive string (`oxrt=debug`, `trace`, ...)
//! - `OXRT_LOG_FORMAT`: `compact`, `pretty` or `json`
//! - `NO_COLOR`: disables ANSI colors when set to any value

use std::env;
use std::fmt;
use std::str::FromStr;

pub use tracing::{Level, debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const FILTER_ENV: &str = "OXRT_LOG";

/// Environment variable selecting the output format.
pub const FORMAT_ENV: &str = "OXRT_LOG_FORMAT";

/// Filter used when nothing else is configured.
pub const DEFAULT_FILTER: &str = "oxrt=info";

/// Parses a log level name.
///
/// Accepts `error`, `warn`, `info`, `debug` and `trace` in any case.
///
/// # Example
///
/// ```
/// use oxrt_log::{Level, parse_level};
///
/// assert_eq!(parse_level("error"), Ok(Level::ERROR));
/// assert_eq!(parse_level("INFO"), Ok(Level::INFO));
/// assert!(parse_level("loud").is_err());
/// ```
///
/// # Errors
///
/// Returns a message naming the rejected input if it is not a level name.
pub fn parse_level(s: &str) -> Result<Level, String> {
    match s.trim().to_ascii_uppercase().as_str() {
        "ERROR" => Ok(Level::ERROR),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "INFO" => Ok(Level::INFO),
        "DEBUG" => Ok(Level::DEBUG),
        "TRACE" => Ok(Level::TRACE),
        _ => Err(format!("Invalid log level: {s}")),
    }
}

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Single-line events, fields inline.
    #[default]
    Compact,
    /// Multi-line, human oriented.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl Format {
    /// Returns the name accepted by [`Format::from_str`].
    pub const fn as_str(&self) -> &'static str {
        match self {
            Format::Compact => "compact",
            Format::Pretty => "pretty",
            Format::Json => "json",
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Format::Compact),
            "pretty" => Ok(Format::Pretty),
            "json" => Ok(Format::Json),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `oxrt=debug,oxrt::runtime::lifecycle=trace`.
    pub filter: String,
    /// Output format.
    pub format: Format,
    /// Whether ANSI colors are emitted.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: DEFAULT_FILTER.to_owned(),
            format: Format::Compact,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Builds a configuration from `OXRT_LOG`, `OXRT_LOG_FORMAT` and `NO_COLOR`.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// [`LogConfig::from_env`] is this function over the process environment;
    /// tests pass a closure over a fixed table.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();

        if let Some(filter) = lookup(FILTER_ENV).filter(|f| !f.trim().is_empty()) {
            config.filter = filter;
        }
        if let Some(format) = lookup(FORMAT_ENV).and_then(|f| f.parse().ok()) {
            config.format = format;
        }
        if lookup("NO_COLOR").is_some() {
            config.ansi = false;
        }

        config
    }

    /// Replaces the filter with a single crate-wide level for `oxrt`.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.filter = format!("oxrt={}", level.as_str().to_ascii_lowercase());
        self
    }

    /// Replaces the output format.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global subscriber described by `config`.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one stays in place.
pub fn init(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_ansi(config.ansi);

    let installed = match config.format {
        Format::Compact => builder.compact().try_init(),
        Format::Pretty => builder.pretty().try_init(),
        Format::Json => builder.json().try_init(),
    };

    installed.is_ok()
}

/// Installs a subscriber configured from the environment.
///
/// Shorthand for `init(&LogConfig::from_env())`.
pub fn init_from_env() -> bool {
    init(&LogConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> {
        let table: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| table.get(key).cloned()
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Ok(Level::ERROR));
        assert_eq!(parse_level("WARN"), Ok(Level::WARN));
        assert_eq!(parse_level("warning"), Ok(Level::WARN));
        assert_eq!(parse_level("Info"), Ok(Level::INFO));
        assert_eq!(parse_level(" debug "), Ok(Level::DEBUG));
        assert_eq!(parse_level("trace"), Ok(Level::TRACE));
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("compact".parse(), Ok(Format::Compact));
        assert_eq!("PRETTY".parse(), Ok(Format::Pretty));
        assert_eq!("json".parse(), Ok(Format::Json));
        assert!("xml".parse::<Format>().is_err());
        assert_eq!(Format::Json.to_string(), "json");
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, DEFAULT_FILTER);
        assert_eq!(config.format, Format::Compact);
        assert!(config.ansi);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("OXRT_LOG", "oxrt=trace"),
            ("OXRT_LOG_FORMAT", "json"),
            ("NO_COLOR", "1"),
        ]));

        assert_eq!(config.filter, "oxrt=trace");
        assert_eq!(config.format, Format::Json);
        assert!(!config.ansi);
    }

    #[test]
    fn test_config_ignores_bad_values() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("OXRT_LOG", "   "),
            ("OXRT_LOG_FORMAT", "yaml"),
        ]));

        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_with_level() {
        let config = LogConfig::default().with_level(Level::DEBUG);
        assert_eq!(config.filter, "oxrt=debug");

        let config = config.with_format(Format::Pretty);
        assert_eq!(config.format, Format::Pretty);
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = LogConfig {
            filter: "oxrt=[".to_owned(),
            ..LogConfig::default()
        };
        // Must not panic on a malformed directive.
        let _ = config.env_filter();
    }

    #[test]
    fn test_init_twice() {
        let config = LogConfig::default().with_level(Level::TRACE);
        let first = init(&config);
        let second = init(&config);

        // Only one global subscriber can ever be installed per process.
        assert!(!(first && second));
        info!("logging initialized");
    }
}
