use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::config::WS_PING_INTERVAL_SECS;
use crate::stream::broadcaster::BroadcasterHandle;
use crate::stream::messages::parse_subscribe;

/// Drives one upgraded realtime socket until either side goes away.
///
/// Frames queued by the broadcaster are forwarded as text; subscribe frames
/// from the client are handed back to the broadcaster. When the broadcaster
/// drops this connection its queue closes and the socket is closed.
pub async fn serve_socket(socket: WebSocket, broadcaster: BroadcasterHandle, league_keys: Vec<String>) {
    let (id, mut outbound) = match broadcaster.connect(league_keys).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("stream registration failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = socket.split();

    let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
    ping_interval.tick().await; // consume immediate first tick

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if write.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(keys) = parse_subscribe(&text) {
                            if broadcaster.resubscribe(id, keys).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = id, "stream read error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = ping_interval.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    broadcaster.disconnect(id).await;
    let _ = write.close().await;
}
