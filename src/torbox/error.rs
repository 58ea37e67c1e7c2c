//! Error types for the Torbox client.
//!
//! Every failure surfaced by [`TorboxClient`](super::TorboxClient) maps onto the
//! closed [`TorboxErrorKind`] taxonomy, which callers use for display and for
//! retry classification.

use std::fmt;

use thiserror::Error;

/// Closed classification of Torbox client failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorboxErrorKind {
    /// No API key configured.
    AuthMissing,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Other HTTP 4xx, or an envelope with `success = false`.
    BadRequest,
    /// Transport, connect, or timeout failure.
    NetworkError,
    /// Response could not be interpreted.
    InvalidResponse,
    /// Remote job finished but exposes no file links yet (transient).
    NoLinksYet,
    /// Anything else.
    Unknown,
}

impl TorboxErrorKind {
    /// Returns the stable snake_case label for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthMissing => "auth_missing",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::BadRequest => "bad_request",
            Self::NetworkError => "network_error",
            Self::InvalidResponse => "invalid_response",
            Self::NoLinksYet => "no_links_yet",
            Self::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status code to its error kind.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            400..=499 => Self::BadRequest,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TorboxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while talking to the Torbox API.
#[derive(Debug, Error)]
pub enum TorboxError {
    /// No API key is configured.
    #[error(
        "Torbox API key is not configured\n  Suggestion: Run `torbox-fetch config set-key <KEY>` or set TORBOX_API_KEY"
    )]
    AuthMissing,

    /// Non-success HTTP status.
    #[error("HTTP {status} calling {endpoint}: {message}")]
    HttpStatus {
        /// Endpoint path or URL that failed.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the envelope, or raw body text.
        message: String,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// HTTP success but the envelope reported `success = false`.
    #[error("request to {endpoint} was rejected: {message}")]
    Rejected {
        /// Endpoint path that was called.
        endpoint: String,
        /// Message extracted from `detail`/`error`/`message`.
        message: String,
    },

    /// Network-level error (DNS, connection refused, TLS, reset).
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// Endpoint path or URL that failed.
        endpoint: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout calling {endpoint}")]
    Timeout {
        /// Endpoint path or URL that timed out.
        endpoint: String,
    },

    /// The response body could not be interpreted.
    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse {
        /// Endpoint path or URL.
        endpoint: String,
        /// What was wrong with it.
        message: String,
    },

    /// The configured base URL or a file link is not a valid URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// The remote job is complete but no file links are exposed yet.
    #[error("job {job} is complete but has no file links yet")]
    NoLinksYet {
        /// Job identifier as known locally.
        job: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl TorboxError {
    /// Creates a network error from a reqwest error, folding timeouts into [`TorboxError::Timeout`].
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        let endpoint = endpoint.into();
        if source.is_timeout() {
            Self::Timeout { endpoint }
        } else {
            Self::Network { endpoint, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(
        endpoint: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
            retry_after,
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Returns the closed taxonomy kind for this error.
    #[must_use]
    pub fn kind(&self) -> TorboxErrorKind {
        match self {
            Self::AuthMissing => TorboxErrorKind::AuthMissing,
            Self::HttpStatus { status, .. } => TorboxErrorKind::from_status(*status),
            Self::Rejected { .. } | Self::InvalidUrl { .. } => TorboxErrorKind::BadRequest,
            Self::Network { .. } | Self::Timeout { .. } => TorboxErrorKind::NetworkError,
            Self::InvalidResponse { .. } => TorboxErrorKind::InvalidResponse,
            Self::NoLinksYet { .. } => TorboxErrorKind::NoLinksYet,
            Self::ClientBuild(_) => TorboxErrorKind::Unknown,
        }
    }

    /// Returns the HTTP status code, when the failure carried one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for [`TorboxErrorKind::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == TorboxErrorKind::NotFound
    }
}
