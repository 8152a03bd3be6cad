//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for the
//! publish and connection paths.
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to WARN
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to compact
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Machine-readable logs from a cron job
//! LOG_FORMAT=json LOG_LEVEL=INFO feedping publish
//!
//! # Watch every retry decision
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG feedping publish
//! ```
//!
//! Logs go to stderr so stdout stays reserved for the outcome report.

use std::env;
use std::io;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Parse a level name, falling back to `default` for anything unknown
pub fn parse_level(s: &str, default: Level) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => default,
    }
}

/// Map `-v` repetitions onto a level, starting from WARN
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Directives that keep dependency chatter below our own logs
const QUIET_DEPENDENCIES: [&str; 2] = ["rumqttc=warn", "tokio=warn"];

fn build_filter(level: Level) -> EnvFilter {
    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    QUIET_DEPENDENCIES
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::new(level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_writer(io::stderr)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_writer(io::stderr)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).init();
        }
    }
}

/// Initialize logging from environment variables
///
/// `LOG_LEVEL` wins over `default_level`, which the CLI derives from `-v`.
pub fn init_default_logging(default_level: Level) {
    let level = env::var("LOG_LEVEL")
        .map(|value| parse_level(&value, default_level))
        .unwrap_or(default_level);

    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let log_format = LogFormat::parse(&format);

    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(level, log_format, include_spans);
}

/// Create a span covering one logical publish, retries included
#[macro_export]
macro_rules! publish_span {
    ($($field:tt)*) => {
        tracing::info_span!("publish", $($field)*)
    };
}

/// Create a span covering one connection attempt
#[macro_export]
macro_rules! connection_span {
    ($($field:tt)*) => {
        tracing::debug_span!("connection", $($field)*)
    };
}

// Re-export macros for convenience
pub use {connection_span, publish_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_compact() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        let test_cases = vec![
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            ("trace", Level::TRACE),
            ("invalid", Level::WARN),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_level(input, Level::WARN), expected, "input: {input}");
        }
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), Level::WARN);
        assert_eq!(level_for_verbosity(1), Level::INFO);
        assert_eq!(level_for_verbosity(2), Level::DEBUG);
        assert_eq!(level_for_verbosity(7), Level::TRACE);
    }

    #[test]
    fn test_quiet_directives_parse() {
        for directive in QUIET_DEPENDENCIES {
            assert!(directive.parse::<Directive>().is_ok(), "{directive}");
        }
    }
}
