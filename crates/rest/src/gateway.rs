//! WebSocket subscription gateway.
//!
//! Long-lived bidirectional JSON sessions. On connect the server sends
//! `connection-available` with the session id; the client binds to
//! subscription ids with `bind` messages and receives history-style
//! notification envelopes until close or `unbind`. Socket writes drain a
//! bounded queue owned by a dedicated send task, so one slow client
//! never blocks evaluation or other sessions.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Queue depth for protocol replies (bind acknowledgements).
const REPLY_QUEUE_CAPACITY: usize = 16;

/// Handles `GET /ws/subscriptions-r4`.
pub async fn subscription_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let engine = state.subscriptions().clone();
    let (session_id, mut notifications) = engine.register_session();
    debug!(%session_id, "subscription session connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Value>(REPLY_QUEUE_CAPACITY);

    let greeting = json!({
        "type": "connection-available",
        "connectionId": session_id.to_string()
    });
    let _ = reply_tx.send(greeting).await;

    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                notification = notifications.recv() => notification,
                reply = reply_rx.recv() => reply,
            };
            let Some(message) = message else {
                break;
            };
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(error) = handle_message(&engine, session_id, &text, &reply_tx).await {
                    warn!(%session_id, %error, "ignoring malformed gateway message");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    engine.remove_session(session_id);
    send_task.abort();
    debug!(%session_id, "subscription session closed");
}

/// Applies one client protocol message.
async fn handle_message(
    engine: &atrium_persistence::SubscriptionEngine,
    session_id: Uuid,
    text: &str,
    replies: &mpsc::Sender<Value>,
) -> Result<(), String> {
    let message: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let message_type = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or("message has no type")?;
    let subscription_id = message
        .get("subscriptionId")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or("message has no subscriptionId")?;

    match message_type {
        "bind" => {
            engine.bind(session_id, subscription_id);
            let _ = replies
                .send(json!({
                    "type": "bound",
                    "subscriptionId": subscription_id.to_string()
                }))
                .await;
            Ok(())
        }
        "unbind" => {
            engine.unbind(session_id, subscription_id);
            let _ = replies
                .send(json!({
                    "type": "unbound",
                    "subscriptionId": subscription_id.to_string()
                }))
                .await;
            Ok(())
        }
        other => Err(format!("unknown message type '{}'", other)),
    }
}
