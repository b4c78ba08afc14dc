//! Top-level error type
//!
//! Component errors stay in their own modules; [`WatchError`] gathers the
//! ones that can end the process so `main` has one thing to report.

use crate::config::ConfigError;
use crate::session::SessionError;
use crate::transport::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Rendered message with credentials removed
    pub fn sanitized_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

// user:password@ inside a URL
static URL_USERINFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s:]+:[^/@\s]+@").expect("userinfo pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;

/// Strip credentials from an error message and bound its length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_ASSIGNMENT.replace_all(message, "${1}=***");
    let mut sanitized = URL_USERINFO.replace_all(&sanitized, "${1}***@").to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

pub type WatchResult<T> = Result<T, WatchError>;
