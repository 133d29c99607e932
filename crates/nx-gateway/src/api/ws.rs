//! WebSocket transport for the console channel
//!
//! Every text frame is one `{"event", "payload"}` message. Each socket is one
//! client connection with its own multiplexer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use nx_protocol::ConnectionId;

use crate::state::GatewayState;

/// `GET /ws/console`
pub async fn console_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let connection_id = ConnectionId::new(Uuid::new_v4().to_string());
    tracing::info!("Console client connected: {}", connection_id);

    let (mux, mut outbound) = state.connect_client(connection_id.clone());
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            tracing::trace!("-> {}", message.event());
            if sender.send(Message::Text(message.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => mux.handle_text(&text).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => mux.handle_text(text).await,
                Err(_) => tracing::debug!("Dropping non-UTF-8 frame from {}", connection_id),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    mux.shutdown();
    drop(mux);
    writer.abort();
    tracing::info!("Console client disconnected: {}", connection_id);
}
