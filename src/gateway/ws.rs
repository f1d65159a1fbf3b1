//! WebSocket upgrade + the per-connection read/forward loop.
//!
//! Handshake carries `auth.token`, `auth.sessionId?`, `auth.inviteKey?` as
//! query parameters (§6). Guest fallback mirrors the source: a missing or
//! rejected token admits a guest connection at the transport layer, with
//! authorization deferred to per-session `allowGuests` (§9 Open Questions —
//! preserved deliberately, flagged there).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ConnectInfo, Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::connection::JoinState;
use crate::model::EventTarget;
use crate::router::events::ClientCommand;

use super::routes::GatewayState;

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "auth.token")]
    token: Option<String>,
    #[serde(rename = "auth.sessionId")]
    session_id: Option<String>,
    #[serde(rename = "auth.inviteKey")]
    invite_key: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HandshakeParams>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, params, state))
}

async fn handle_socket(
    mut socket: axum::extract::ws::WebSocket,
    addr: SocketAddr,
    params: HandshakeParams,
    state: GatewayState,
) {
    if !state.connections.admit(addr.ip()) {
        let err = crate::router::events::connection_error("rate_limited");
        let _ = socket.send(Message::Text(err.to_string().into())).await;
        return;
    }

    let principal = match &params.token {
        Some(token) => match auth::verify(token, &state.config, None).await {
            Ok(p) => p,
            Err(_) => auth::guest_principal(),
        },
        None => auth::guest_principal(),
    };
    let authenticated = !principal.is_guest();

    let connection_id = Uuid::new_v4().to_string();
    let connection = state
        .connections
        .register(connection_id.clone(), principal, authenticated);

    info!(connection_id = %connection_id, authenticated, "connection opened");

    // Honor an invite key offered in the handshake itself (reconnect /
    // single-roundtrip join), otherwise wait for an explicit join_session.
    if let Some(invite_key) = params.invite_key.clone() {
        let outcome = state.router.handle(
            &connection,
            ClientCommand::JoinSession {
                invite_key: Some(invite_key),
                session_id: params.session_id.clone(),
            },
        );
        if !send_all(&mut socket, &outcome.direct).await {
            cleanup(&state, &connection, addr);
            return;
        }
    }

    let mut rx = connection
        .session_id()
        .and_then(|sid| state.registry.get(&sid))
        .map(|session| session.bus.subscribe());

    loop {
        tokio::select! {
            event = recv_or_pending(&mut rx) => {
                let Some(event) = event else { continue };
                let deliver = match &event.to {
                    EventTarget::Room => true,
                    EventTarget::Peers(excluded) => excluded != &connection.connection_id,
                    EventTarget::Sender(target) => target == &connection.connection_id,
                };
                if deliver && socket.send(Message::Text(event.payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let outcome = state.router.handle_raw(&connection, &text);
                        if outcome.bound_session.is_some() {
                            rx = connection
                                .session_id()
                                .and_then(|sid| state.registry.get(&sid))
                                .map(|session| session.bus.subscribe());
                        }
                        if outcome.unbound {
                            rx = None;
                        }
                        if !send_all(&mut socket, &outcome.direct).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if connection.state() == JoinState::Bound {
        state.router.handle_disconnect(&connection);
    }
    cleanup(&state, &connection, addr);
    info!(connection_id = %connection_id, "connection closed");
}

async fn recv_or_pending(
    rx: &mut Option<tokio::sync::broadcast::Receiver<crate::model::ServerEvent>>,
) -> Option<crate::model::ServerEvent> {
    match rx {
        Some(r) => loop {
            match r.recv().await {
                Ok(event) => return Some(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("ws handler lagged, missed {n} events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}

async fn send_all(socket: &mut axum::extract::ws::WebSocket, payloads: &[serde_json::Value]) -> bool {
    for payload in payloads {
        if socket.send(Message::Text(payload.to_string().into())).await.is_err() {
            return false;
        }
    }
    true
}

fn cleanup(state: &GatewayState, connection: &Arc<crate::connection::ConnectionState>, addr: SocketAddr) {
    state.connections.remove(&connection.connection_id, Some(addr.ip()));
}
