//! Structured logging built on `tracing`
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: `json`, `pretty` or `compact` (default json)
//! - `LOG_SPANS`: `true` to emit span open/close events (default false)
//! - `RUST_LOG`: replaces the level filter entirely when set
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG topicwatch run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable, one JSON object per event
    Json,
    /// Multi-line with colors
    Pretty,
    /// Single line with colors
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl LogSettings {
    /// Build settings from raw environment values (pure function)
    pub fn from_values(level: Option<&str>, format: Option<&str>, spans: Option<&str>) -> Self {
        let level = match level.map(str::to_uppercase).as_deref() {
            Some("ERROR") => Level::ERROR,
            Some("WARN") => Level::WARN,
            Some("DEBUG") => Level::DEBUG,
            Some("TRACE") => Level::TRACE,
            _ => Level::INFO,
        };

        Self {
            level,
            format: format.map_or(LogFormat::Json, LogFormat::parse),
            include_spans: spans.is_some_and(|s| s.eq_ignore_ascii_case("true")),
        }
    }

    pub fn from_env() -> Self {
        let level = env::var("LOG_LEVEL").ok();
        let format = env::var("LOG_FORMAT").ok();
        let spans = env::var("LOG_SPANS").ok();
        Self::from_values(level.as_deref(), format.as_deref(), spans.as_deref())
    }

    /// Raise the level to at least DEBUG (`-v` on the command line)
    pub fn verbose(mut self) -> Self {
        if self.level < Level::DEBUG {
            self.level = Level::DEBUG;
        }
        self
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    // Dependency noise stays at warn
    for directive in ["rumqttc=warn", "rustls=warn", "hyper=warn", "warp=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber; a second call leaves the first one in place
pub fn init_logging(settings: &LogSettings) {
    let span_events = if settings.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let registry = tracing_subscriber::registry().with(build_filter(settings.level));

    let result = match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    init_logging(&LogSettings::from_env());
}

/// Span covering one broker session
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_session", $($field)*)
    };
}

/// Span covering the handling of one inbound message
#[macro_export]
macro_rules! message_span {
    ($($field:tt)*) => {
        tracing::debug_span!("inbound_message", $($field)*)
    };
}

pub use {message_span, session_span};
