//! Google Calendar provider.
//!
//! [`GoogleProvider`] serves every connected user of the bot. Credentials are
//! kept per user in the key-value store and refreshed on demand.
//!
//! # Connect flow
//!
//! 1. The server generates a [`ConnectState`] and redirects the user to
//!    [`GoogleProvider::authorization_url`].
//! 2. Google redirects back with an authorization code.
//! 3. [`GoogleProvider::connect_with_code`] exchanges it and stores the
//!    [`Credential`].
//!
//! # Example
//!
//! ```ignore
//! use calbot_providers::google::{GoogleConfig, GoogleProvider, OAuthCredentials};
//!
//! let config = GoogleConfig::new(
//!     OAuthCredentials::new("id.apps.googleusercontent.com", "secret"),
//!     "https://chat.example/plugins/calendar/oauth/complete",
//! );
//! let provider = GoogleProvider::new(config, store, clock)?;
//! let events = provider.list_events("user", EventQuery::bootstrap(now, horizon)).await?;
//! ```

mod client;
mod config;
mod oauth;
mod provider;
mod tokens;

pub use client::GoogleCalendarClient;
pub use config::{CALENDAR_API_BASE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GoogleConfig, OAuthCredentials};
pub use oauth::{ConnectState, OAuthClient};
pub use provider::GoogleProvider;
pub use tokens::{CREDENTIAL_KEY_SUFFIX, Credential, CredentialStore, TokenGrant};
