//! HTTP surface: the push webhook and the OAuth connect flow.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, PushOutcome};
use crate::error::{ServerError, ServerResult};

/// Header carrying the authenticated chat user on `/oauth/connect`.
pub const USER_ID_HEADER: &str = "x-user-id";

const CHANNEL_ID_HEADERS: [&str; 2] = ["x-goog-channel-id", "x-channel-id"];
const RESOURCE_ID_HEADERS: [&str; 2] = ["x-goog-resource-id", "x-resource-id"];
const RESOURCE_STATE_HEADERS: [&str; 2] = ["x-goog-resource-state", "x-resource-state"];

const COMPLETED_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>Google Calendar</title></head>\n<body>\n<p>Completed connecting to Google Calendar. Please close this window.</p>\n</body>\n</html>\n";

/// Builds the router for `engine`.
pub fn router(engine: Arc<Engine>) -> Router {
    let webhook_path = engine.config().webhook_path.clone();
    Router::new()
        .route(&webhook_path, post(handle_push))
        .route("/oauth/connect", get(handle_connect))
        .route("/oauth/complete", get(handle_complete))
        .with_state(engine)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PushParams {
    #[serde(rename = "userID")]
    user_id: Option<String>,
}

async fn handle_push(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<PushParams>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        warn!("push without userID");
        return (StatusCode::BAD_REQUEST, "missing userID").into_response();
    };

    let (Some(channel_id), Some(resource_id), Some(state)) = (
        first_header(&headers, &CHANNEL_ID_HEADERS),
        first_header(&headers, &RESOURCE_ID_HEADERS),
        first_header(&headers, &RESOURCE_STATE_HEADERS),
    ) else {
        warn!(user_id, "push without channel headers");
        return (StatusCode::BAD_REQUEST, "missing channel headers").into_response();
    };

    match engine
        .handle_push(&user_id, channel_id, resource_id, state)
        .await
    {
        Ok(outcome) => {
            if let PushOutcome::Reconciled(stats) = outcome {
                debug!(user_id, changed = stats.changed(), "push reconciled");
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            error!(user_id, error = %e, "failed to process push");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_connect(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let Some(user_id) = first_header(&headers, &[USER_ID_HEADER]).filter(|u| !u.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "Not authorized").into_response();
    };

    match engine.begin_connect(user_id) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            error!(user_id, error = %e, "failed to start connect");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    code: Option<String>,
    state: Option<String>,
}

async fn handle_complete(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<CompleteParams>,
) -> Response {
    let (Some(code), Some(state)) = (params.code, params.state) else {
        return (StatusCode::BAD_REQUEST, "missing authorization code").into_response();
    };

    match engine.complete_oauth(&code, &state).await {
        Ok(_) => Html(COMPLETED_HTML).into_response(),
        Err(e @ ServerError::OAuthState { .. }) => {
            warn!(error = %e, "rejected OAuth completion");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to connect to Google Calendar: {}", e),
        )
            .into_response(),
    }
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}
