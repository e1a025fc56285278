//! Server error types.

use std::io;

use calbot_core::StoreError;
use calbot_providers::{ErrorClass, ProviderError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the engine or its HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Calendar provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Key-value store read or write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Delivering a notification failed.
    #[error("notification delivery failed: {message}")]
    Notify { message: String },

    /// OAuth state missing, malformed or not matching the stored one.
    #[error("invalid OAuth state: {message}")]
    OAuthState { message: String },

    /// Invalid engine configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IO error (listener, signals).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify {
            message: message.into(),
        }
    }

    pub fn oauth_state(message: impl Into<String>) -> Self {
        Self::OAuthState {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// How the failure should be handled.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provider(e) => e.class(),
            Self::Store(_) => ErrorClass::Store,
            Self::Notify { .. } | Self::Io(_) => ErrorClass::Transient,
            Self::OAuthState { .. } | Self::Config { .. } => ErrorClass::Protocol,
        }
    }

    pub fn is_store(&self) -> bool {
        self.class() == ErrorClass::Store
    }
}
