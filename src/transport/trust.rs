//! Per-connect TLS trust setup
//!
//! The CA bundle is read in a single attempt. There is no separate existence
//! check, so a file that disappears or loses permissions between startup and
//! a reconnect simply takes the fallback path.

use super::options::TlsSettings;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Resolved trust decision handed to the protocol engine
#[derive(Clone, PartialEq)]
pub struct TrustPolicy {
    /// PEM bytes of the trusted CA bundle, when one was loaded
    pub ca_bundle: Option<Vec<u8>>,
    /// Whether the broker certificate must verify
    pub strict: bool,
    pub source: TrustSource,
}

impl std::fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("ca_bundle_len", &self.ca_bundle.as_ref().map(Vec::len))
            .field("strict", &self.strict)
            .field("source", &self.source)
            .finish()
    }
}

/// Where the trust decision came from
#[derive(Debug, Clone, PartialEq)]
pub enum TrustSource {
    /// CA bundle loaded from the configured path
    Bundle,
    /// No CA path configured
    NotConfigured,
    /// CA path configured but the read failed or the file was empty
    Unreadable(String),
}

impl TrustPolicy {
    /// True when verification was requested off and nothing forced it back on
    pub fn is_degraded(&self) -> bool {
        !self.strict
    }
}

/// Load the trust policy for one connect attempt
pub fn load_trust_policy(settings: &TlsSettings) -> TrustPolicy {
    let read_result = settings.ca_path.as_deref().map(read_bundle);
    let policy = resolve_trust(read_result, settings.reject_unauthorized);
    log_trust_decision(&policy, settings);
    policy
}

fn read_bundle(path: &Path) -> io::Result<Vec<u8>> {
    let bytes = std::fs::read(path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "CA bundle is empty",
        ));
    }
    Ok(bytes)
}

/// Decide the trust policy from the outcome of the bundle read (pure function)
///
/// A loaded bundle always forces strict verification, overriding a weaker
/// configured default.
pub fn resolve_trust(
    read_result: Option<io::Result<Vec<u8>>>,
    configured_strict: bool,
) -> TrustPolicy {
    match read_result {
        Some(Ok(bundle)) => TrustPolicy {
            ca_bundle: Some(bundle),
            strict: true,
            source: TrustSource::Bundle,
        },
        Some(Err(e)) => TrustPolicy {
            ca_bundle: None,
            strict: configured_strict,
            source: TrustSource::Unreadable(e.to_string()),
        },
        None => TrustPolicy {
            ca_bundle: None,
            strict: configured_strict,
            source: TrustSource::NotConfigured,
        },
    }
}

fn log_trust_decision(policy: &TrustPolicy, settings: &TlsSettings) {
    let path = settings
        .ca_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    match &policy.source {
        TrustSource::Bundle => {
            if !settings.reject_unauthorized {
                warn!(
                    ca_path = %path,
                    "CA bundle loaded; enforcing certificate verification despite reject_unauthorized = false"
                );
            } else {
                info!(ca_path = %path, "CA bundle loaded; certificate verification enabled");
            }
        }
        TrustSource::Unreadable(cause) => {
            warn!(
                ca_path = %path,
                cause = %cause,
                degraded = policy.is_degraded(),
                "CA bundle unavailable; falling back to configured verification"
            );
        }
        TrustSource::NotConfigured => {
            if policy.is_degraded() {
                warn!("No CA bundle configured and verification disabled; broker identity is not checked");
            } else {
                info!("No CA bundle configured; verifying against system roots");
            }
        }
    }
}
