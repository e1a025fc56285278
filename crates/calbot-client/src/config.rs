//! Service configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/calbot/config.toml` by default.
//!
//! Secret values (`client_id`, `client_secret`, the bot `token`) support
//! secret references:
//! - `pass::path/in/store`: resolved via `pass show`
//! - `env::VAR_NAME`: resolved from the environment
//! - plain text: used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use calbot_core::TracingOutputFormat;
use calbot_providers::google::{GoogleConfig, OAuthCredentials};
use calbot_server::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration for the calbot service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    pub google: GoogleSettings,
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub bot: BotSettings,
}

/// Google OAuth client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// Credentials JSON downloaded from the Cloud Console, used when the
    /// inline fields are absent.
    pub credentials_file: Option<PathBuf>,

    /// Calendar watched for every user.
    pub calendar_id: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            credentials_file: None,
            calendar_id: "primary".to_string(),
        }
    }
}

/// HTTP listener and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the HTTP server binds to.
    pub bind: String,

    /// Public base URL Google and browsers reach this service at.
    pub site_url: Option<String>,

    /// Where the key-value store keeps its files.
    pub data_dir: Option<PathBuf>,

    /// Path of the push webhook.
    pub webhook_path: String,

    /// Log output format of `serve`.
    pub log_format: TracingOutputFormat,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8065".to_string(),
            site_url: None,
            data_dir: None,
            webhook_path: EngineConfig::DEFAULT_WEBHOOK_PATH.to_string(),
            log_format: TracingOutputFormat::Json,
        }
    }
}

/// Scheduler and sync timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub tick_seconds: u64,
    pub lead_minutes: i64,
    pub renewal_margin_minutes: i64,
    pub bootstrap_horizon_minutes: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            lead_minutes: 10,
            renewal_margin_minutes: 10,
            bootstrap_horizon_minutes: 60,
        }
    }
}

/// Chat bot endpoint notifications are posted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub post_url: Option<String>,

    /// Bearer token (supports `pass::` and `env::` prefixes).
    pub token: Option<String>,

    /// Name the bot posts as.
    pub username: String,

    /// Log notifications instead of posting them.
    pub dry_run: bool,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            post_url: None,
            token: None,
            username: "gcal".to_string(),
            dry_run: false,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calbot")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calbot")
    }

    /// Store directory, from `[server] data_dir` or the platform default.
    pub fn data_dir(&self) -> PathBuf {
        self.server
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    pub fn site_url(&self) -> ClientResult<&str> {
        self.server
            .site_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClientError::Config("[server] site_url is required".to_string()))
    }

    /// Builds the immutable engine configuration.
    pub fn engine_config(&self) -> ClientResult<EngineConfig> {
        let engine = &self.engine;
        let config = EngineConfig::new(self.site_url()?)
            .with_webhook_path(&self.server.webhook_path)
            .with_tick_period(Duration::from_secs(engine.tick_seconds))
            .with_notification_lead(chrono::Duration::minutes(engine.lead_minutes))
            .with_renewal_margin(chrono::Duration::minutes(engine.renewal_margin_minutes))
            .with_bootstrap_horizon(chrono::Duration::minutes(engine.bootstrap_horizon_minutes));
        config.validate()?;
        Ok(config)
    }

    /// Builds the Google provider configuration, redirecting to `redirect_url`.
    pub fn google_config(&self, redirect_url: impl Into<String>) -> ClientResult<GoogleConfig> {
        let credentials = self.google.resolve_credentials()?;
        let config = GoogleConfig::new(credentials, redirect_url)
            .with_calendar_id(&self.google.calendar_id);
        config.validate().map_err(ClientError::Config)?;
        Ok(config)
    }

    /// Checks everything `serve` needs.
    pub fn validate(&self) -> ClientResult<()> {
        let engine = self.engine_config()?;
        self.google_config(engine.redirect_url())?;
        if !self.bot.dry_run && self.bot.post_url.as_deref().is_none_or(str::is_empty) {
            return Err(ClientError::Config(
                "[bot] post_url is required unless dry_run is set".to_string(),
            ));
        }
        self.bot.resolve_token()?;
        Ok(())
    }
}

impl GoogleSettings {
    /// Resolves Google OAuth credentials.
    ///
    /// Inline `client_id`/`client_secret` win; each is passed through
    /// `secret::resolve()` to expand `pass::` and `env::` references.
    /// Otherwise `credentials_file` is read.
    pub(crate) fn resolve_credentials(&self) -> ClientResult<OAuthCredentials> {
        let credentials = match (&self.client_id, &self.credentials_file) {
            (Some(raw_id), _) => {
                let raw_secret = self.client_secret.as_deref().ok_or_else(|| {
                    ClientError::Config(
                        "client_secret is missing from [google] section".to_string(),
                    )
                })?;
                let id = crate::secret::resolve(raw_id).map_err(|e| {
                    ClientError::Config(format!("failed to resolve client_id: {}", e))
                })?;
                let secret = crate::secret::resolve(raw_secret).map_err(|e| {
                    ClientError::Config(format!("failed to resolve client_secret: {}", e))
                })?;
                OAuthCredentials::new(id, secret)
            }
            (None, Some(path)) => OAuthCredentials::from_file(path).map_err(|e| {
                ClientError::Config(format!("{}: {}", path.display(), e))
            })?,
            (None, None) => {
                return Err(ClientError::Config(format!(
                    "Google credentials not found. Add to {}:\n  \
                     [google]\n  \
                     client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                     client_secret = \"YOUR_SECRET\"",
                    ClientConfig::default_path().display()
                )));
            }
        };

        credentials
            .validate()
            .map_err(|e| ClientError::Config(format!("invalid Google credentials: {}", e)))?;
        Ok(credentials)
    }
}

impl BotSettings {
    /// The bearer token with secret references expanded.
    pub fn resolve_token(&self) -> ClientResult<Option<String>> {
        self.token
            .as_deref()
            .map(crate::secret::resolve)
            .transpose()
            .map_err(|e| ClientError::Config(format!("failed to resolve bot token: {}", e)))
    }
}
