//! Primary chat entry — POST /chat
//!
//! The message is posted into the in-process channel (so secondary bots
//! observe it) and the lead bot's reply comes back in the envelope.
//! Secondary bot contributions arrive over the WebSocket stream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use conclave_core::error::{ErrorCode, Failure};
use conclave_core::types::{ChannelId, SessionKey};

use crate::app::AppState;
use crate::envelope;

const DEFAULT_USER: &str = "web-user";
const DEFAULT_CHANNEL: &str = "webchat";

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let user = req.user_id.unwrap_or_else(|| DEFAULT_USER.to_string());
    let channel = ChannelId::from(
        req.channel_id
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
            .as_str(),
    );
    let session = SessionKey::new(user.as_str(), channel.as_str());

    let message = state.adapter.post_user_message(&channel, &user, &req.message);

    let budget = Duration::from_millis(state.config.gateway.chat_timeout_ms);
    let outcome = match tokio::time::timeout(
        budget,
        state.orchestrator.on_message(&channel, message),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            return envelope::failure(&Failure::new(
                ErrorCode::ProviderTimeout,
                format!("chat exceeded {}ms budget", budget.as_millis()),
            ))
        }
    };

    match outcome.into_result() {
        Ok(Some(reply)) => envelope::success(
            json!(reply.text),
            json!({
                "source": reply.source,
                "skillName": reply.skill_name,
                "confidence": reply.confidence,
                "sessionKey": session.encode(),
            }),
        ),
        Ok(None) => envelope::failure(&Failure::new(
            ErrorCode::SystemInternal,
            "no lead bot is configured for this channel",
        )),
        Err(failure) => envelope::failure(&failure),
    }
}
