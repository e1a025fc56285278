//! OAuth 2.0 authorization-code flow for a server-side web application.
//!
//! 1. [`ConnectState::generate`] produces a CSRF state `<random>_<userID>`.
//! 2. [`OAuthClient::authorization_url`] builds the consent URL.
//! 3. Google redirects back with `code` and `state`.
//! 4. [`OAuthClient::exchange_code`] trades the code for tokens.
//! 5. [`OAuthClient::refresh`] renews the access token later on.

use rand::Rng as _;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

use super::config::{GoogleConfig, OAuthCredentials};
use super::tokens::TokenGrant;

/// Length of the random part of the state token.
const STATE_RANDOM_LENGTH: usize = 32;

/// CSRF state carried through the consent redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectState {
    value: String,
}

impl ConnectState {
    /// Generates a fresh state bound to `user_id`.
    pub fn generate(user_id: &str) -> Self {
        let random: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_RANDOM_LENGTH)
            .map(char::from)
            .collect();
        Self {
            value: format!("{}_{}", random, user_id),
        }
    }

    /// Wraps a state received from the redirect.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The user id embedded after the first `_`.
    pub fn user_id(&self) -> Option<&str> {
        self.value
            .split_once('_')
            .map(|(_, user)| user)
            .filter(|user| !user.is_empty())
    }
}

/// OAuth client for Google's token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    http_client: reqwest::Client,
    auth_url: String,
    token_url: String,
    redirect_url: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;

        Ok(Self {
            credentials: config.credentials.clone(),
            http_client,
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            redirect_url: config.redirect_url.clone(),
            scopes: config.scopes.clone(),
        })
    }

    /// Builds the consent URL for `state`.
    ///
    /// Requests offline access and forces the consent prompt so Google issues
    /// a refresh token every time.
    pub fn authorization_url(&self, state: &ConnectState) -> String {
        let scope = self.scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&\
            access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&scope),
            urlencoding::encode(state.as_str()),
        )
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_url.as_str()),
        ];

        let grant = self.request_token(&params, "token exchange").await?;
        if grant.refresh_token.is_none() {
            debug!("token exchange returned no refresh token");
        }
        info!("exchanged authorization code for tokens");
        Ok(grant)
    }

    /// Obtains a new access token from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let grant = self.request_token(&params, "token refresh").await?;
        debug!("refreshed access token");
        Ok(grant)
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> ProviderResult<TokenGrant> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::network(format!("{} timed out", what))
                } else {
                    ProviderError::network(format!("{} request failed: {}", what, e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited(format!("{} rate limited", what)));
        }

        if status.is_server_error() {
            return Err(ProviderError::server(format!(
                "{} failed ({}): {}",
                what, status, body
            )));
        }

        // 400 invalid_grant means the refresh token was revoked or the code
        // was already used.
        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "{} failed ({}): {}",
                what, status, body
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {}", e))
        })?;

        Ok(token_response.into_grant())
    }
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GoogleConfig {
        GoogleConfig::new(
            OAuthCredentials::new("test-client.apps.googleusercontent.com", "test-secret"),
            "https://chat.example/oauth/complete",
        )
        .with_endpoints(server.uri(), format!("{}/token", server.uri()))
    }

    #[test]
    fn state_embeds_user_id() {
        let state = ConnectState::generate("user_with_underscores");
        assert_eq!(state.user_id(), Some("user_with_underscores"));
        let (random, _) = state.as_str().split_once('_').unwrap();
        assert_eq!(random.len(), STATE_RANDOM_LENGTH);
        assert!(random.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn state_is_random() {
        assert_ne!(ConnectState::generate("u1"), ConnectState::generate("u1"));
    }

    #[test]
    fn malformed_state_has_no_user() {
        assert_eq!(ConnectState::from_value("nounderscore").user_id(), None);
        assert_eq!(ConnectState::from_value("abc_").user_id(), None);
    }

    #[test]
    fn authorization_url_format() {
        let config = GoogleConfig::new(
            OAuthCredentials::new("test-client.apps.googleusercontent.com", "test-secret"),
            "https://chat.example/oauth/complete",
        );
        let client = OAuthClient::new(&config).unwrap();
        let url = client.authorization_url(&ConnectState::from_value("xyz_u1"));

        assert!(url.starts_with(super::super::config::GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=test-client.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fchat.example%2Foauth%2Fcomplete"));
        assert!(url.contains("state=xyz_u1"));
        assert!(url.contains("calendar.events.readonly"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[tokio::test]
    async fn exchange_code_parses_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token":"a1","refresh_token":"r1","expires_in":3599,
                    "scope":"scope1 scope2","token_type":"Bearer"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config_for(&server)).unwrap();
        let grant = client.exchange_code("the-code").await.unwrap();

        assert_eq!(grant.access_token, "a1");
        assert_eq!(grant.refresh_token.as_deref(), Some("r1"));
        assert_eq!(grant.expires_in, Some(3599));
        assert_eq!(grant.scopes, vec!["scope1", "scope2"]);
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config_for(&server)).unwrap();
        let err = client.refresh("r1").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthorized);
    }

    #[tokio::test]
    async fn token_endpoint_outage_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config_for(&server)).unwrap();
        let err = client.refresh("r1").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
