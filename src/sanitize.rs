//! Error-message sanitization
//!
//! Raw network and database error strings routinely embed private IPs, full
//! URLs, and filesystem paths. Every message that is persisted or emitted as
//! an event crosses this boundary first; nothing downstream sees the raw
//! text.
//!
//! The pipeline:
//! 1. Map well-known OS error codes to human phrases.
//! 2. Collapse HTTP status noise to `HTTP NNN`.
//! 3. Redact URLs, IP addresses, and filesystem paths.
//! 4. Truncate to 200 characters.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of a sanitized message, excluding the ellipsis.
const MAX_MESSAGE_LEN: usize = 200;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bhttps?://[^\s)>\]]+").unwrap());

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}(?::\d{1,5})?\b").unwrap());

static IPV6_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[?(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{0,4}\]?(?::\d{1,5})?").unwrap());

static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[A-Za-z]:\\|/)[\w./\\-]{2,}").unwrap());

static HTTP_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bHTTP(?:\s+status)?(?:\s+code)?[:\s]+(\d{3})\b[^,;]*").unwrap());

/// OS error codes and common client phrasings mapped to stable human text.
///
/// Matching is substring-based: reqwest and the OS wrap these codes in
/// varying amounts of prose, and the code itself is the reliable part.
const ERROR_CODE_PHRASES: &[(&str, &str)] = &[
    ("ECONNREFUSED", "Connection refused"),
    ("ECONNRESET", "Connection reset by peer"),
    ("ETIMEDOUT", "Connection timed out"),
    ("ENOTFOUND", "DNS lookup failed"),
    ("EAI_AGAIN", "DNS lookup failed"),
    ("EHOSTUNREACH", "Host unreachable"),
    ("ENETUNREACH", "Network unreachable"),
    ("EPIPE", "Connection closed unexpectedly"),
    ("ECONNABORTED", "Connection aborted"),
    ("operation timed out", "Connection timed out"),
    ("dns error", "DNS lookup failed"),
    ("failed to lookup address", "DNS lookup failed"),
    // Plain OS phrases as surfaced through reqwest/hyper source chains.
    ("connection refused", "Connection refused"),
    ("connection reset", "Connection reset by peer"),
    ("no route to host", "Host unreachable"),
    ("network is unreachable", "Network unreachable"),
    ("timed out", "Connection timed out"),
    ("error trying to connect", "Connection failed"),
];

/// Sanitize an error message for persistence or event emission.
///
/// The result carries enough signal to triage ("Connection refused",
/// "HTTP 503") without leaking addresses, URLs, or paths from the polling
/// host's point of view.
pub fn sanitize_error_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // Well-known error codes win outright: the surrounding prose is noise.
    let lowered = trimmed.to_lowercase();
    for (code, phrase) in ERROR_CODE_PHRASES {
        if lowered.contains(&code.to_lowercase()) {
            return (*phrase).to_string();
        }
    }

    // HTTP status noise collapses to the durable part.
    let message = HTTP_STATUS_RE.replace_all(trimmed, "HTTP $1");

    let message = URL_RE.replace_all(&message, "[redacted-url]");
    let message = IPV6_RE.replace_all(&message, "[redacted-address]");
    let message = IPV4_RE.replace_all(&message, "[redacted-address]");
    let message = PATH_RE.replace_all(&message, "[redacted-path]");

    truncate(message.as_ref())
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_MESSAGE_LEN).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_maps_os_error_codes() {
        assert_eq!(
            sanitize_error_message("connect ECONNREFUSED 10.1.2.3:8080"),
            "Connection refused"
        );
        assert_eq!(
            sanitize_error_message("getaddrinfo ENOTFOUND internal.corp"),
            "DNS lookup failed"
        );
        assert_eq!(
            sanitize_error_message("request failed: ETIMEDOUT"),
            "Connection timed out"
        );
        assert_eq!(
            sanitize_error_message("read ECONNRESET"),
            "Connection reset by peer"
        );
    }

    #[test]
    fn test_maps_reqwest_phrasings() {
        assert_eq!(
            sanitize_error_message("error trying to connect: tcp connect error"),
            "Connection failed"
        );
        assert_eq!(
            sanitize_error_message("dns error: failed to lookup address information"),
            "DNS lookup failed"
        );
    }

    #[test]
    fn test_redacts_urls() {
        let out = sanitize_error_message("error fetching https://internal.corp:8443/health today");
        assert!(!out.contains("internal.corp"));
        assert!(out.contains("[redacted-url]"));
    }

    #[test]
    fn test_redacts_private_ips() {
        let out = sanitize_error_message("no route to 192.168.1.44");
        assert!(!out.contains("192.168.1.44"));
        assert!(out.contains("[redacted-address]"));

        let out = sanitize_error_message("refused by 127.0.0.1:5432");
        assert!(!out.contains("127.0.0.1"));
    }

    #[test]
    fn test_redacts_ipv6() {
        let out = sanitize_error_message("refused by [::1]:5432");
        assert!(!out.contains("::1"));
    }

    #[test]
    fn test_redacts_paths() {
        let out = sanitize_error_message("could not open /var/lib/observatory/db.sqlite");
        assert!(!out.contains("/var/lib"));
        assert!(out.contains("[redacted-path]"));
    }

    #[test]
    fn test_collapses_http_status() {
        assert_eq!(
            sanitize_error_message("HTTP 503: Service Unavailable"),
            "HTTP 503"
        );
        assert_eq!(
            sanitize_error_message("HTTP status 404 Not Found on upstream"),
            "HTTP 404"
        );
    }

    #[test]
    fn test_truncates_long_messages() {
        let long = "x".repeat(500);
        let out = sanitize_error_message(&long);
        assert_eq!(out.chars().count(), MAX_MESSAGE_LEN + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(sanitize_error_message("   "), "");
    }

    #[test]
    fn test_plain_message_passes_through() {
        assert_eq!(
            sanitize_error_message("expected dependency array in payload"),
            "expected dependency array in payload"
        );
    }
}
