//! SSRF validation for health-endpoint URLs
//!
//! Every outbound fetch is gated on this check. The policy blocks URL
//! literals that point into the polling host's own network: loopback,
//! RFC1918, link-local, unique-local, unspecified, and the cloud metadata
//! address, plus a small set of hostname patterns. Validation happens before
//! any I/O; a violation never produces an outbound request.
//!
//! Hostnames are NOT resolved here. Only literal IPs and name patterns are
//! judged, which keeps validation synchronous and side-effect free.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Hostnames that are blocked regardless of resolution.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];

/// Hostname suffixes that are blocked.
const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

/// A URL rejected by the SSRF policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsrfViolation {
    /// The string is not a parseable absolute URL
    InvalidUrl,

    /// Scheme other than http/https
    DisallowedScheme(String),

    /// The URL has no host component
    MissingHost,

    /// Host is a blocked literal address or name
    BlockedHost(String),
}

impl fmt::Display for SsrfViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsrfViolation::InvalidUrl => write!(f, "invalid URL"),
            SsrfViolation::DisallowedScheme(scheme) => {
                write!(f, "disallowed URL scheme: {}", scheme)
            }
            SsrfViolation::MissingHost => write!(f, "URL has no host"),
            SsrfViolation::BlockedHost(host) => {
                write!(f, "blocked host: {}", host)
            }
        }
    }
}

impl std::error::Error for SsrfViolation {}

/// The endpoint-validation policy applied before any outbound fetch
///
/// The strict policy is the production default. The permissive variant
/// admits private and loopback targets and exists for development setups
/// and tests where the monitored services genuinely live on the local
/// network; scheme and URL-shape checks still apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfPolicy {
    allow_private: bool,
}

impl SsrfPolicy {
    pub fn strict() -> Self {
        Self {
            allow_private: false,
        }
    }

    pub fn permissive() -> Self {
        Self {
            allow_private: true,
        }
    }

    /// Validate a health endpoint against this policy.
    ///
    /// Returns the parsed URL on success so callers fetch exactly what was
    /// validated.
    pub fn validate(&self, raw: &str) -> Result<Url, SsrfViolation> {
        let url = Url::parse(raw).map_err(|_| SsrfViolation::InvalidUrl)?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SsrfViolation::DisallowedScheme(other.to_string())),
        }

        let host = url.host().ok_or(SsrfViolation::MissingHost)?;

        if self.allow_private {
            return Ok(url);
        }

        match host {
            Host::Ipv4(addr) => {
                if is_blocked_ipv4(addr) {
                    return Err(SsrfViolation::BlockedHost(addr.to_string()));
                }
            }
            Host::Ipv6(addr) => {
                if is_blocked_ipv6(addr) {
                    return Err(SsrfViolation::BlockedHost(addr.to_string()));
                }
            }
            Host::Domain(name) => {
                let name = name.to_lowercase();
                // A domain that is actually a textual IP (rare, but url can
                // surface e.g. IPv4-mapped forms this way) gets the IP rules.
                if let Ok(addr) = name.parse::<IpAddr>() {
                    let blocked = match addr {
                        IpAddr::V4(v4) => is_blocked_ipv4(v4),
                        IpAddr::V6(v6) => is_blocked_ipv6(v6),
                    };
                    if blocked {
                        return Err(SsrfViolation::BlockedHost(name));
                    }
                }
                if BLOCKED_HOSTS.contains(&name.as_str())
                    || BLOCKED_SUFFIXES.iter().any(|s| name.ends_with(s))
                {
                    return Err(SsrfViolation::BlockedHost(name));
                }
            }
        }

        Ok(url)
    }
}

/// Validate a health endpoint against the strict production policy.
pub fn validate_endpoint(raw: &str) -> Result<Url, SsrfViolation> {
    SsrfPolicy::strict().validate(raw)
}

fn is_blocked_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        // CGNAT range 100.64.0.0/10
        || (addr.octets()[0] == 100 && (addr.octets()[1] & 0b1100_0000) == 0b0100_0000)
}

fn is_blocked_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    // Unique-local fc00::/7
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // Link-local fe80::/10
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // IPv4-mapped addresses inherit the IPv4 rules.
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    false
}
