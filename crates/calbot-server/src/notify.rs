//! Chat notifications.
//!
//! The engine hands a [`Notification`] to a [`NotificationSink`] addressed by
//! user id. [`HttpSink`] posts it to the chat bot endpoint; [`LogSink`] only
//! logs it.

use std::time::Duration;

use calbot_core::Event;
use calbot_providers::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Attachment color of event reminders.
pub const EVENT_COLOR: &str = "#7FC1EE";
/// Greeting sent after a successful connect.
pub const WELCOME_MESSAGE: &str = "Welcome to Google Calendar Plugin";

/// A rich attachment of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub pretext: String,
    pub title: String,
    pub title_link: Option<String>,
    pub text: String,
    pub color: String,
}

/// A bot message for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Notification {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            attachments: Vec::new(),
        }
    }

    pub fn welcome() -> Self {
        Self::text(WELCOME_MESSAGE)
    }

    pub fn connect_failed(reason: impl std::fmt::Display) -> Self {
        Self::text(format!(
            "Failed to connect to Google Calendar: {}. Please try `connect` again.",
            reason
        ))
    }

    /// Asks the user to go through the connect flow again at `connect_url`.
    pub fn reconnect(connect_url: &str) -> Self {
        Self::text(format!(
            "Google Calendar access was revoked or has expired. [Reconnect]({}) to keep receiving reminders.",
            connect_url
        ))
    }

    /// Reminder for an event starting in `lead_minutes`.
    pub fn event_reminder(event: &Event, lead_minutes: i64) -> Self {
        Self {
            message: None,
            attachments: vec![Attachment {
                pretext: format!("Event starting in {} min", lead_minutes),
                title: event.effective_title().to_string(),
                title_link: event.html_link.clone(),
                text: format!(
                    "Today from {} to {}",
                    event.start.display_clock(),
                    event.end.display_clock()
                ),
                color: EVENT_COLOR.to_string(),
            }],
        }
    }
}

/// Where notifications go.
pub trait NotificationSink: Send + Sync {
    fn send<'a>(
        &'a self,
        user_id: &'a str,
        notification: &'a Notification,
    ) -> BoxFuture<'a, ServerResult<()>>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send<'a>(
        &'a self,
        user_id: &'a str,
        notification: &'a Notification,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            let titles: Vec<&str> = notification
                .attachments
                .iter()
                .map(|a| a.title.as_str())
                .collect();
            info!(
                user_id,
                message = notification.message.as_deref().unwrap_or(""),
                attachments = ?titles,
                "notification"
            );
            Ok(())
        })
    }
}

/// Body posted by [`HttpSink`].
#[derive(Debug, Serialize)]
struct BotPost<'a> {
    user_id: &'a str,
    username: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Posts notifications as JSON to the chat bot endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    username: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServerError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            token: None,
            username: username.into(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn post(&self, user_id: &str, notification: &Notification) -> ServerResult<()> {
        let body = BotPost {
            user_id,
            username: &self.username,
            notification,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServerError::notify(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServerError::notify(format!("bot endpoint returned {}: {}", status, text)));
        }

        debug!(user_id, "notification delivered");
        Ok(())
    }
}

impl NotificationSink for HttpSink {
    fn send<'a>(
        &'a self,
        user_id: &'a str,
        notification: &'a Notification,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(self.post(user_id, notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbot_core::EventTime;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> Event {
        Event::new(
            "e2",
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 15, 4, 0).unwrap()),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 16, 0, 0).unwrap()),
        )
        .with_summary("Design review")
        .with_html_link("https://calendar.example/e2")
    }

    #[test]
    fn event_reminder_attachment() {
        let notification = Notification::event_reminder(&event(), 10);
        assert!(notification.message.is_none());

        insta::assert_json_snapshot!(notification.attachments[0], @r###"
        {
          "pretext": "Event starting in 10 min",
          "title": "Design review",
          "title_link": "https://calendar.example/e2",
          "text": "Today from 3:04PM to 4:00PM",
          "color": "#7FC1EE"
        }
        "###);
    }

    #[test]
    fn untitled_event_gets_placeholder() {
        let mut untitled = event();
        untitled.summary = None;
        let notification = Notification::event_reminder(&untitled, 10);
        assert_eq!(notification.attachments[0].title, "(No title)");
    }

    #[test]
    fn welcome_text() {
        assert_eq!(
            Notification::welcome().message.as_deref(),
            Some("Welcome to Google Calendar Plugin")
        );
    }

    #[test]
    fn reconnect_links_to_connect_url() {
        let message = Notification::reconnect("https://chat.example/oauth/connect")
            .message
            .unwrap();
        assert!(message.contains("(https://chat.example/oauth/connect)"));
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        LogSink.send("u1", &Notification::welcome()).await.unwrap();
    }

    #[tokio::test]
    async fn http_sink_posts_json_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/bot"))
            .and(header("authorization", "Bearer bot-token"))
            .and(body_partial_json(serde_json::json!({
                "user_id": "u1",
                "username": "calendar",
                "message": "Welcome to Google Calendar Plugin",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpSink::new(format!("{}/hooks/bot", server.uri()), "calendar")
            .unwrap()
            .with_token("bot-token");
        sink.send("u1", &Notification::welcome()).await.unwrap();
    }

    #[tokio::test]
    async fn http_sink_reports_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let sink = HttpSink::new(server.uri(), "calendar").unwrap();
        let err = sink.send("u1", &Notification::welcome()).await.unwrap_err();
        assert!(matches!(err, ServerError::Notify { .. }));
    }
}
