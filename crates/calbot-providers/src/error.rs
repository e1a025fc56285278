//! Error types for calendar provider operations.
//!
//! Every failure carries a fine-grained [`ProviderErrorCode`] and collapses to
//! an [`ErrorClass`] that decides how callers react.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Credential invalid or revoked. The user must reconnect; never retried.
    Unauthorized,
    /// Network trouble, rate limiting or provider outage. Retried on the next
    /// scheduled pass.
    Transient,
    /// Response did not have the expected shape. The pass is abandoned.
    Protocol,
    /// Persisting state failed. Nothing the operation did counts as committed.
    Store,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
            Self::Protocol => "protocol",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Access token rejected, refresh token revoked, or no credential stored.
    AuthenticationFailed,
    /// The credential lacks the required scope.
    AuthorizationFailed,
    /// Connection failed, timed out, DNS resolution, etc.
    NetworkError,
    /// Too many requests.
    RateLimited,
    /// Provider returned a 5xx status.
    ServerError,
    /// Body could not be parsed or lacked required fields.
    InvalidResponse,
    /// Resource not found (404), e.g. an already expired watch channel.
    NotFound,
    /// Request was rejected as malformed (400).
    BadRequest,
    /// Missing or invalid OAuth client configuration.
    ConfigurationError,
    /// Reading or writing the credential store failed.
    StorageError,
}

impl ProviderErrorCode {
    /// Maps the code onto the handling class.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed | Self::AuthorizationFailed => ErrorClass::Unauthorized,
            Self::NetworkError | Self::RateLimited | Self::ServerError => ErrorClass::Transient,
            Self::InvalidResponse
            | Self::NotFound
            | Self::BadRequest
            | Self::ConfigurationError => ErrorClass::Protocol,
            Self::StorageError => ErrorClass::Store,
        }
    }

    /// Returns true if the next scheduled pass may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error that occurred while talking to the calendar provider.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Provider that generated this error (e.g. "google").
    provider: Option<String>,
    /// Delay requested by the provider, from a `Retry-After` header.
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            retry_after: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthorizationFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::BadRequest, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::StorageError, message)
    }

    /// Sets the provider name for this error.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Records the provider's requested back-off.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
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

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// True when the user has to go through the connect flow again.
    pub fn needs_reconnect(&self) -> bool {
        self.class() == ErrorClass::Unauthorized
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<calbot_core::StoreError> for ProviderError {
    fn from(err: calbot_core::StoreError) -> Self {
        Self::storage(err.to_string()).with_source(err)
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_classes() {
        assert_eq!(
            ProviderErrorCode::AuthenticationFailed.class(),
            ErrorClass::Unauthorized
        );
        assert_eq!(
            ProviderErrorCode::AuthorizationFailed.class(),
            ErrorClass::Unauthorized
        );
        assert_eq!(ProviderErrorCode::NetworkError.class(), ErrorClass::Transient);
        assert_eq!(ProviderErrorCode::RateLimited.class(), ErrorClass::Transient);
        assert_eq!(ProviderErrorCode::ServerError.class(), ErrorClass::Transient);
        assert_eq!(ProviderErrorCode::InvalidResponse.class(), ErrorClass::Protocol);
        assert_eq!(ProviderErrorCode::NotFound.class(), ErrorClass::Protocol);
        assert_eq!(ProviderErrorCode::StorageError.class(), ErrorClass::Store);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ProviderError::network("timeout").is_retryable());
        assert!(ProviderError::rate_limited("slow down").is_retryable());
        assert!(!ProviderError::authentication("revoked").is_retryable());
        assert!(!ProviderError::invalid_response("bad json").is_retryable());
    }

    #[test]
    fn unauthorized_needs_reconnect() {
        assert!(ProviderError::authentication("revoked").needs_reconnect());
        assert!(!ProviderError::server("503").needs_reconnect());
    }

    #[test]
    fn display_includes_provider_and_code() {
        let err = ProviderError::rate_limited("too many requests").with_provider("google");
        let display = format!("{}", err);
        assert!(display.contains("[google]"));
        assert!(display.contains("rate_limited"));
        assert!(display.contains("too many requests"));
    }

    #[test]
    fn retry_after_and_source_are_kept() {
        use std::error::Error;
        let err = ProviderError::rate_limited("quota")
            .with_retry_after(Duration::from_secs(30))
            .with_source(std::io::Error::other("socket"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.source().is_some());
    }
}
