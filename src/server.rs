//! HTTP ingest: Slack Events API callbacks and Discord gateway relay posts.
//! Handlers only authenticate and enqueue; processing happens in `bot::run`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::platform::{InboundEvent, SourceKind};

pub const RELAY_SECRET_HEADER: &str = "x-relay-secret";
const SLACK_RETRY_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct IngestState {
    pub events: mpsc::Sender<InboundEvent>,
    pub slack_token: Option<Arc<str>>,
    pub discord_secret: Option<Arc<str>>,
}

pub fn router(state: IngestState, slack: bool, discord: bool) -> Router {
    let mut router = Router::new();
    if slack {
        router = router.route("/slack/events", post(slack_events));
    }
    if discord {
        router = router.route("/discord/events", post(discord_events));
    }
    router.with_state(state)
}

pub async fn serve(listen: &str, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {listen}"))?;
    info!("Listening for platform events on {}", listen);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")
}

fn enqueue(state: &IngestState, source: SourceKind, payload: Value) -> Result<(), StatusCode> {
    state
        .events
        .try_send(InboundEvent { source, payload })
        .map_err(|e| {
            warn!("Dropping {} event: {}", source, e);
            StatusCode::SERVICE_UNAVAILABLE
        })
}

async fn slack_events(
    State(state): State<IngestState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if let Some(expected) = &state.slack_token {
        if body.get("token").and_then(Value::as_str) != Some(expected.as_ref()) {
            warn!("Rejected Slack event with a bad verification token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    match body.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = body.get("challenge").cloned().unwrap_or(Value::Null);
            Ok(Json(json!({ "challenge": challenge })))
        }
        Some("event_callback") => {
            // Slack redelivers when we are slow; the first delivery is enough
            if headers.contains_key(SLACK_RETRY_HEADER) {
                debug!("Ignoring Slack retry delivery");
            } else {
                enqueue(&state, SourceKind::Slack, body)?;
            }
            Ok(Json(json!({ "ok": true })))
        }
        other => {
            debug!("Ignoring Slack payload of type {:?}", other);
            Ok(Json(json!({ "ok": true })))
        }
    }
}

async fn discord_events(
    State(state): State<IngestState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, StatusCode> {
    if let Some(expected) = &state.discord_secret {
        let given = headers
            .get(RELAY_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(expected.as_ref()) {
            warn!("Rejected Discord relay post with a bad secret");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    enqueue(&state, SourceKind::Discord, body)?;
    Ok(StatusCode::ACCEPTED)
}
