//! WebSocket connection handler
//!
//! One connection = one hub observer. The welcome, pong, and broadcast
//! events all flow through the observer's queue, so a single writer keeps
//! them in order.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use rf_core::{ChannelObserver, Observer, ObserverMessage};

use crate::message::{self, ClientMessage};
use crate::server::WsState;

/// A frame the client has not accepted by then ends the connection
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (observer, mut events) = ChannelObserver::new();
    let observer = Arc::new(observer);
    let id = state.hub.register(observer.clone());
    info!("WebSocket observer {} connected", id.as_u64());

    if observer.deliver(&message::welcome()).is_err() {
        state.hub.unregister(id);
        return;
    }

    // Writer: hub events plus the idle keepalive
    let period = state.keepalive_period();
    let send_task = async move {
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                msg = events.recv() => match msg {
                    Some(ObserverMessage::Event(event)) => event,
                    Some(ObserverMessage::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = keepalive.tick() => message::keepalive(),
            };

            let text = match message::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode event: {}", e);
                    continue;
                }
            };
            match timeout(SEND_TIMEOUT, ws_tx.send(WsMessage::Text(text.into()))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!("Observer {} stopped reading, closing", id.as_u64());
                    break;
                }
            }
        }
        debug!("Send task ended for observer {}", id.as_u64());
    };

    // Reader: answers `ping`, watches for disconnect
    let hub = state.hub.clone();
    let recv_task = async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => match ClientMessage::parse(&text) {
                    ClientMessage::Ping => {
                        let _ = observer.deliver(&message::pong(hub.observer_count()));
                    }
                    ClientMessage::Unknown(other) => {
                        debug!("Ignoring client message: {}", other);
                    }
                },
                Ok(WsMessage::Close(_)) => {
                    debug!("Client closed observer {}", id.as_u64());
                    break;
                }
                Err(e) => {
                    debug!("WebSocket error on observer {}: {}", id.as_u64(), e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.unregister(id);
    info!("WebSocket observer {} closed", id.as_u64());
}
