//! Webhook channel.
//!
//! Endpoint:
//! - POST /channels/{name} - Dispatch `{conv_id?, text, metadata?}` and return the bot replies
//!
//! When the channel has a `url`, every reply is also POSTed there as
//! `{conv_id, text, metadata, timestamp}`, in order, after the response is sent.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use parley_types::config::ChannelConfig;
use parley_types::event::{new_conversation_id, Event, InboundEvent, Metadata};

use crate::http::error::AppError;
use crate::state::AppState;

/// Channel type served by this handler.
pub const WEBHOOK_TYPE: &str = "webhook";

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub conv_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub conv_id: String,
    pub status: &'static str,
    pub events: Vec<Event>,
}

/// Body POSTed to a channel's outbound `url` for each bot event.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct OutboundPayload {
    pub conv_id: String,
    pub text: Option<String>,
    pub metadata: Metadata,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&Event> for OutboundPayload {
    fn from(event: &Event) -> Self {
        Self {
            conv_id: event.conv_id.clone(),
            text: event.text.clone(),
            metadata: event.metadata.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// POST /channels/{name}
pub async fn receive(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WebhookRequest>,
) -> Result<Json<WebhookResponse>, AppError> {
    let channel = state
        .config
        .channel(&name)
        .filter(|c| c.kind == WEBHOOK_TYPE)
        .ok_or_else(|| AppError::NotFound(format!("No webhook channel named '{name}'")))?
        .clone();

    authorize(&channel, &headers)?;

    let text = body
        .text
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("No text provided in the request.".to_string()))?;
    let conv_id = body.conv_id.unwrap_or_else(new_conversation_id);
    tracing::info!(channel = %channel.name, %conv_id, "webhook message received");

    let inbound = InboundEvent::new(conv_id.clone(), channel.name.clone(), text).with_metadata(body.metadata);
    let events = state.dispatcher.handle(inbound).await?;

    if let Some(url) = channel.url.clone() {
        if !events.is_empty() {
            let client = state.http.clone();
            let outbound = events.clone();
            tokio::spawn(async move { deliver(&client, &url, &outbound).await });
        }
    }

    Ok(Json(WebhookResponse {
        conv_id,
        status: "Message received.",
        events,
    }))
}

/// Check the `Authorization: Bearer <token>` header against the channel's token.
fn authorize(channel: &ChannelConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = channel.token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => {
            tracing::warn!(channel = %channel.name, "invalid webhook token");
            Err(AppError::Unauthorized("Invalid token".to_string()))
        }
        None => Err(AppError::Unauthorized(
            "Missing token. Provide it via 'Authorization: Bearer <token>'.".to_string(),
        )),
    }
}

/// POST each event to `url` in order. Failures are logged, not retried.
pub async fn deliver(client: &reqwest::Client, url: &str, events: &[Event]) {
    for event in events {
        let payload = OutboundPayload::from(event);
        match client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(conv_id = %event.conv_id, event_id = event.event_id, "bot event delivered");
            }
            Ok(resp) => {
                tracing::error!(
                    conv_id = %event.conv_id,
                    event_id = event.event_id,
                    status = %resp.status(),
                    "bot event delivery rejected"
                );
            }
            Err(err) => {
                tracing::error!(conv_id = %event.conv_id, event_id = event.event_id, %err, "bot event delivery failed");
            }
        }
    }
}
