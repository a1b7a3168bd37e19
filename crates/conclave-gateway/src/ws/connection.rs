//! Streaming chat over WebSocket — GET /ws
//!
//! The client sends `{"type": "chat", "message": "...", "user_id"?,
//! "channel_id"?}` frames. The server answers each with a
//! `{"type": "reply", ...}` frame and, in between, forwards every bot
//! contribution on channels this connection has touched as
//! `{"type": "message", ...}` frames — that is how secondary-bot
//! observations reach the client as they complete.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use conclave_channels::ChannelAdapter;
use conclave_core::metrics::Metrics;
use conclave_core::types::ChannelId;

use crate::app::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Chat {
        message: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        channel_id: Option<String>,
    },
}

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    Metrics::incr(&state.metrics.ws_connections);
    let (mut sink, mut stream) = socket.split();
    let mut events = state.adapter.subscribe();
    let mut watched: HashSet<ChannelId> = HashSet::new();

    loop {
        tokio::select! {
            // Server shutdown closes every client.
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            // Forward bot contributions on watched channels.
            event = events.recv() => {
                let Ok((channel, message)) = event else { continue };
                if message.author_is_bot && watched.contains(&channel) {
                    let frame = json!({
                        "type": "message",
                        "channel": channel.as_str(),
                        "author": message.author,
                        "content": message.content,
                    });
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }

            // Client frames.
            incoming = stream.next() => {
                let Some(Ok(msg)) = incoming else { break };
                let Message::Text(text) = msg else { continue };
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        let err = json!({ "type": "error", "message": format!("bad frame: {e}") });
                        if sink.send(Message::Text(err.to_string().into())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let ClientFrame::Chat { message, user_id, channel_id } = frame;
                let user = user_id.unwrap_or_else(|| "ws-user".to_string());
                let channel = ChannelId::from(
                    channel_id.unwrap_or_else(|| "webchat".to_string()).as_str(),
                );
                watched.insert(channel.clone());

                let stored = state.adapter.post_user_message(&channel, &user, &message);
                let reply = match state
                    .orchestrator
                    .on_message(&channel, stored)
                    .await
                    .into_result()
                {
                    Ok(Some(outcome)) => json!({
                        "type": "reply",
                        "text": outcome.text,
                        "source": outcome.source,
                        "skillName": outcome.skill_name,
                    }),
                    Ok(None) => json!({
                        "type": "reply",
                        "text": serde_json::Value::Null,
                        "source": "none",
                    }),
                    Err(failure) => json!({
                        "type": "error",
                        "code": failure.code.as_str(),
                        "message": failure.user_message,
                    }),
                };
                if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("websocket connection closed");
}
