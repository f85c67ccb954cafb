//! WebSocket progress feed.
//!
//! Each connected client receives every progress event published after it
//! subscribed, as one JSON object per message. Missed events are not
//! replayed on reconnect.

use crate::state::SharedContext;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

pub async fn websocket(
    State(context): State<SharedContext>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| feed(socket, context))
}

async fn feed(mut socket: WebSocket, context: SharedContext) {
    let mut subscription = context.bus.subscribe();
    tracing::debug!("progress subscriber connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode progress event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Clients only listen; anything but a close/ping is ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(
        lagged = subscription.lagged(),
        "progress subscriber disconnected"
    );
}
