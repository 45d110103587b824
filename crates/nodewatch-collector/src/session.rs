//! Per-agent WebSocket session.
//!
//! An agent connects to `/ws?key=<shared key>`. Each text frame is one
//! report; the handler stamps it with the observed source address, stages
//! it, and answers with the literal ack. When the socket closes the node is
//! taken offline straight away rather than waiting for the sweep.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use nodewatch_proto::{ACK, NodeIdentity};
use nodewatch_store::StagingKey;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CollectorError, CollectorResult};
use crate::state::CollectorState;

/// Query parameters of the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Shared secret.
    pub key: Option<String>,
}

/// Handle WebSocket upgrade request for /ws.
///
/// A missing or unknown key is refused with 401 before the upgrade.
pub async fn ws_upgrade(
    State(state): State<Arc<CollectorState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> CollectorResult<Response> {
    if !state.config().accepts_key(params.key.as_deref()) {
        warn!(peer = %peer, "rejected agent with missing or invalid key");
        return Err(CollectorError::Unauthorized);
    }

    let max_size = state.config().max_message_size;
    Ok(ws
        .max_message_size(max_size)
        .on_upgrade(move |socket| handle_agent_connection(socket, peer, state)))
}

/// Run one agent connection to completion.
async fn handle_agent_connection(mut socket: WebSocket, peer: SocketAddr, state: Arc<CollectorState>) {
    let session = Uuid::new_v4();
    let ip = peer.ip().to_string();
    let mut node: Option<(StagingKey, NodeIdentity)> = None;
    info!(session = %session, peer = %peer, "agent connected");

    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Text(text)) => match state.stage(text.as_str(), &ip) {
                Ok((key, identity)) => {
                    if node.as_ref().is_some_and(|(k, _)| *k != key) {
                        // Host name changed mid-session: the old identity is gone.
                        if let Some((old_key, old_id)) = node.take() {
                            state.mark_disconnected(&old_key, &old_id);
                        }
                    }
                    node = Some((key, identity));
                    if let Err(e) = socket.send(Message::Text(ACK.into())).await {
                        debug!(session = %session, error = %e, "failed to send ack");
                        break;
                    }
                }
                Err(e) => warn!(session = %session, peer = %peer, error = %e, "dropped report"),
            },
            Ok(Message::Binary(_)) => {
                debug!(session = %session, "ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(session = %session, "received close frame");
                break;
            }
            Err(e) => {
                debug!(session = %session, error = %e, "websocket receive error");
                break;
            }
        }
    }

    match node {
        Some((key, identity)) => {
            state.mark_disconnected(&key, &identity);
            info!(session = %session, identity = %identity, node = %key, "agent disconnected");
        }
        None => info!(session = %session, peer = %peer, "agent disconnected before reporting"),
    }
}
