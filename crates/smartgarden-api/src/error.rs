use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Top-level error type for the `smartgarden-api` crate.
///
/// Covers the token endpoint, the smart system REST surface, and the push
/// socket. `smartgarden-core` classifies these into its auth, channel and
/// command taxonomies.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token endpoint rejected the application key/secret.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// The application is not allowed to use the requested API.
    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    /// Upstream reported a concurrent session for the same credentials.
    #[error("Simultaneous login detected: {message}")]
    SimultaneousLogin { message: String },

    /// A bearer token was refused by the smart system API.
    #[error("Access token rejected -- re-authentication required")]
    Unauthorized,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Rate limited by the cloud API. Includes the retry-after hint when sent.
    #[error("Rate limited by the cloud API (retry after: {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Smart system API ────────────────────────────────────────────
    /// Non-success response from the smart system API.
    #[error("Smart system API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The account has no registered locations.
    #[error("No locations found -- check if your account has registered devices")]
    NoLocations,

    // ── Push socket ─────────────────────────────────────────────────
    /// Websocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Websocket closed by the server.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status >= 500,
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the bearer token should be discarded.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Upstream retry-after hint, if the server sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// HTTP status code, if this error came from an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::AccessDenied { .. } => Some(403),
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// ── Response body helpers ────────────────────────────────────────────

/// Phrases the auth service uses when a second session is opened for the
/// same application.
const SIMULTANEOUS_LOGIN_MARKERS: &[&str] = &[
    "simultaneous login",
    "simultaneous logins detected",
    "already authenticated",
    "session already exists",
];

/// Returns `true` if an upstream message reports a simultaneous login.
pub fn mentions_simultaneous_login(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    SIMULTANEOUS_LOGIN_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorObject>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Extract a human-readable message from an error body.
///
/// Handles JSON:API `errors[]`, plain `{ message }` and OAuth2
/// `{ error, error_description }` shapes, falling back to the raw text.
pub(crate) fn error_message(raw: &str, fallback: &str) -> String {
    let Ok(body) = serde_json::from_str::<ErrorBody>(raw) else {
        return if raw.trim().is_empty() {
            fallback.to_owned()
        } else {
            raw.trim().to_owned()
        };
    };

    if let Some(first) = body.errors.into_iter().next() {
        return match (first.title, first.detail) {
            (Some(title), Some(detail)) => format!("{title} - {detail}"),
            (Some(text), None) | (None, Some(text)) => text,
            (None, None) => fallback.to_owned(),
        };
    }

    body.message
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| fallback.to_owned())
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_simultaneous_login_phrases() {
        assert!(mentions_simultaneous_login(
            "Simultaneous logins detected for this application"
        ));
        assert!(mentions_simultaneous_login("Session already exists"));
        assert!(!mentions_simultaneous_login("invalid client secret"));
    }

    #[test]
    fn error_message_prefers_json_api_errors() {
        let raw = r#"{"errors":[{"title":"Forbidden","detail":"not connected"}]}"#;
        assert_eq!(error_message(raw, "403"), "Forbidden - not connected");
    }

    #[test]
    fn error_message_reads_oauth_shape() {
        let raw = r#"{"error":"invalid_client","error_description":"bad secret"}"#;
        assert_eq!(error_message(raw, "400"), "bad secret");
    }

    #[test]
    fn error_message_falls_back_to_raw_text() {
        assert_eq!(error_message("gateway down", "502"), "gateway down");
        assert_eq!(error_message("  ", "502"), "502");
    }

    #[test]
    fn rate_limit_exposes_retry_after() {
        let err = Error::RateLimited {
            retry_after_secs: Some(42),
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = Error::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(!err.is_transient());
        let err = Error::Api {
            status: 503,
            message: "down".into(),
        };
        assert!(err.is_transient());
    }
}
