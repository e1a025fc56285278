//! Google Calendar API client.
//!
//! Low-level HTTP calls: event listing, push-channel watch and channel stop.
//! Access tokens are passed per call; token refresh lives in the provider.

use calbot_core::{EventStatus, EventTime};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{EventQuery, WatchChannel};
use crate::raw_event::RawEvent;

use super::config::GoogleConfig;

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base_url: String,
}

impl GoogleCalendarClient {
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
            http_client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Lists events from a calendar, following `nextPageToken` to the end.
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        query: &EventQuery,
    ) -> ProviderResult<Vec<RawEvent>> {
        let mut all_events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .list_events_page(access_token, calendar_id, query, page_token.as_deref())
                .await?;
            pages += 1;

            all_events.extend(page.items.into_iter().filter_map(convert_event));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            calendar_id,
            mode = query.mode(),
            pages,
            count = all_events.len(),
            "fetched events"
        );
        Ok(all_events)
    }

    async fn list_events_page(
        &self,
        access_token: &str,
        calendar_id: &str,
        query: &EventQuery,
        page_token: Option<&str>,
    ) -> ProviderResult<EventListResponse> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base_url,
            urlencoding::encode(calendar_id)
        );

        let mut params: Vec<(&str, String)> = match query {
            EventQuery::Bootstrap { window } => vec![
                ("timeMin", window.start.to_rfc3339()),
                ("timeMax", window.end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ],
            EventQuery::Incremental { since, until } => vec![
                ("updatedMin", since.to_rfc3339()),
                ("timeMax", until.to_rfc3339()),
                ("showDeleted", "true".to_string()),
                ("singleEvents", "true".to_string()),
            ],
        };
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&params)
            .send()
            .await
            .map_err(request_error)?;

        let body = read_success_body(response, "events.list").await?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse event list: {}", e))
        })
    }

    /// Opens a `web_hook` channel on the calendar.
    pub async fn watch(
        &self,
        access_token: &str,
        calendar_id: &str,
        callback_url: &str,
        channel_id: &str,
    ) -> ProviderResult<WatchChannel> {
        let url = format!(
            "{}/calendars/{}/events/watch",
            self.api_base_url,
            urlencoding::encode(calendar_id)
        );
        let request = WatchRequest {
            id: channel_id,
            kind: "web_hook",
            address: callback_url,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let body = read_success_body(response, "events.watch").await?;
        let channel: ChannelResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse watch response: {}", e))
        })?;

        channel.into_watch_channel(channel_id)
    }

    /// Stops a push channel.
    pub async fn stop(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> ProviderResult<()> {
        let url = format!("{}/channels/stop", self.api_base_url);
        let request = StopRequest {
            id: channel_id,
            resource_id,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        read_success_body(response, "channels.stop").await?;
        debug!(channel_id, "stopped channel");
        Ok(())
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    let message = if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    };
    ProviderError::network(message).with_source(e)
}

/// Maps the response status onto the error taxonomy and returns the body of a
/// successful response.
async fn read_success_body(response: reqwest::Response, call: &str) -> ProviderResult<String> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let err = ProviderError::rate_limited(format!("{}: rate limit exceeded", call));
        return Err(match retry_after {
            Some(delay) => err.with_retry_after(delay),
            None => err,
        });
    }

    if status.is_success() {
        return response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} failed ({}): {}", call, status, body);
    Err(match status.as_u16() {
        401 => ProviderError::authentication(message),
        403 => ProviderError::authorization(message),
        404 => ProviderError::not_found(message),
        400 => ProviderError::bad_request(message),
        500..=599 => ProviderError::server(message),
        _ => ProviderError::invalid_response(message),
    })
}

/// Converts an API event. Cancelled entries are kept as tombstones.
fn convert_event(event: ApiEvent) -> Option<RawEvent> {
    let Some(id) = event.id else {
        warn!("skipping event without id");
        return None;
    };

    let status = event
        .status
        .as_deref()
        .map(EventStatus::parse)
        .unwrap_or_default();

    Some(RawEvent {
        start: event.start.as_ref().and_then(|t| t.to_event_time(&id)),
        end: event.end.as_ref().and_then(|t| t.to_event_time(&id)),
        updated: event
            .updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        id,
        status,
        summary: event.summary,
        html_link: event.html_link,
    })
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    html_link: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

impl ApiEventTime {
    fn to_event_time(&self, event_id: &str) -> Option<EventTime> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map(|parsed| EventTime::from_utc(parsed.with_timezone(&Utc)))
                .map_err(|e| warn!(event_id, "failed to parse event time {}: {}", dt, e))
                .ok();
        }
        if let Some(date) = &self.date {
            return NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(EventTime::from_date)
                .map_err(|e| warn!(event_id, "failed to parse event date {}: {}", date, e))
                .ok();
        }
        None
    }
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    resource_id: &'a str,
}

/// Response from events.watch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    id: Option<String>,
    resource_id: Option<String>,
    /// Milliseconds since the epoch, sent as a string.
    expiration: Option<String>,
}

impl ChannelResponse {
    fn into_watch_channel(self, requested_id: &str) -> ProviderResult<WatchChannel> {
        let resource_id = self
            .resource_id
            .ok_or_else(|| ProviderError::invalid_response("watch response has no resourceId"))?;

        let millis = self
            .expiration
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                ProviderError::invalid_response("watch response has no valid expiration")
            })?;
        let expiry = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            ProviderError::invalid_response(format!("expiration out of range: {}", millis))
        })?;

        if let Some(id) = self.id.as_deref().filter(|id| *id != requested_id) {
            warn!(requested = requested_id, returned = id, "provider changed channel id");
        }

        Ok(WatchChannel {
            channel_id: self.id.unwrap_or_else(|| requested_id.to_string()),
            resource_id,
            expiry,
        })
    }
}
