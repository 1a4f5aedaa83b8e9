//! Error types for credential, HTTP and import operations.
//!
//! Errors fall into two classes. Session-level errors (auth refresh,
//! quota, configuration) are fatal and propagate to the job. Everything
//! else is item-level: the import pipeline records it against the item's
//! key and moves on.

use std::fmt;
use thiserror::Error;

/// Longest response body excerpt kept on an error.
pub const BODY_EXCERPT_LIMIT: usize = 512;

/// The category of a transfer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferErrorCode {
    /// The refresh token is missing, expired or was rejected, or a request
    /// was still unauthorized after one refresh.
    AuthRefresh,
    /// The destination reported that its storage is full (HTTP 413).
    QuotaExceeded,
    /// The destination answered with an unexpected HTTP status.
    RemoteRequest,
    /// A response body could not be parsed.
    MalformedResponse,
    /// Missing or invalid credentials, URLs or settings.
    Configuration,
    /// Transport failure: connection refused, timeout, DNS.
    Network,
    /// A child item references a parent whose import did not succeed.
    MissingParent,
    /// Unexpected internal state.
    Internal,
}

impl TransferErrorCode {
    /// Returns true if this error must abort the whole job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthRefresh | Self::QuotaExceeded | Self::Configuration
        )
    }

    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRefresh => "auth_refresh",
            Self::QuotaExceeded => "quota_exceeded",
            Self::RemoteRequest => "remote_request",
            Self::MalformedResponse => "malformed_response",
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::MissingParent => "missing_parent",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for TransferErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised while authenticating, talking to a destination, or
/// importing an item.
#[derive(Debug, Error)]
pub struct TransferError {
    code: TransferErrorCode,
    message: String,
    /// HTTP status of the response that caused this error, if any.
    status: Option<u16>,
    /// Excerpt of the response body, if any.
    body: Option<String>,
    /// Service the error came from (e.g. "pod").
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransferError {
    /// Creates a new error with the given code and message.
    pub fn new(code: TransferErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            body: None,
            provider: None,
            source: None,
        }
    }

    /// Creates an auth refresh error.
    pub fn auth_refresh(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::AuthRefresh, message)
    }

    /// Creates a quota exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::QuotaExceeded, message)
    }

    /// Creates a remote request error.
    pub fn remote_request(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::RemoteRequest, message)
    }

    /// Creates a malformed response error.
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::MalformedResponse, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::Configuration, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::Network, message)
    }

    /// Creates a missing parent error.
    pub fn missing_parent(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::MissingParent, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TransferErrorCode::Internal, message)
    }

    /// Builds the error for a non-success HTTP response.
    ///
    /// 413 always maps to [`TransferErrorCode::QuotaExceeded`], whichever
    /// operation triggered it.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let code = if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            TransferErrorCode::QuotaExceeded
        } else {
            TransferErrorCode::RemoteRequest
        };
        let message = match status.canonical_reason() {
            Some(reason) => format!("got error code {} ({})", status.as_u16(), reason),
            None => format!("got error code {}", status.as_u16()),
        };
        Self::new(code, message)
            .with_status(status.as_u16())
            .with_body(body)
    }

    /// Sets the HTTP status for this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the response body excerpt, truncated to [`BODY_EXCERPT_LIMIT`].
    pub fn with_body(mut self, body: &str) -> Self {
        if !body.is_empty() {
            self.body = Some(excerpt(body));
        }
        self
    }

    /// Sets the provider name for this error.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> TransferErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Returns true if this error must abort the whole job.
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(ref body) = self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "request timeout".to_string()
        } else if e.is_connect() {
            format!("connection failed: {}", e)
        } else {
            format!("request failed: {}", e)
        };
        TransferError::network(message).with_source(e)
    }
}

/// A cloneable snapshot of a [`TransferError`], kept in import reports and
/// the executor's failure log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportError {
    pub code: TransferErrorCode,
    pub message: String,
}

impl From<&TransferError> for ImportError {
    fn from(err: &TransferError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A specialized Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
