//! Web-socket upgrade route.
//!
//! Performs the handshake, derives initial session attributes from the
//! request, and hands the upgraded socket to the dispatcher.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{debug, warn};

use crate::server::AppState;
use crate::websocket::WebSocketTransport;

/// Attribute key holding the remote address.
pub const PEER_ATTRIBUTE: &str = "peer";

/// Prefix for attributes copied from request headers.
pub const HEADER_PREFIX: &str = "header.";

/// Initial attributes for a session accepted from an HTTP request.
///
/// Every header becomes `header.<lowercase-name>`; repeated headers are
/// joined with `", "` and values that are not visible ASCII are skipped.
pub fn request_attributes(headers: &HeaderMap, peer: Option<SocketAddr>) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            continue;
        }
        let _ = attributes.insert(
            format!("{HEADER_PREFIX}{}", name.as_str()),
            Value::String(values.join(", ")),
        );
    }
    if let Some(peer) = peer {
        let _ = attributes.insert(PEER_ATTRIBUTE.to_string(), Value::String(peer.to_string()));
    }
    attributes
}

/// GET `<ws_path>`: upgrade and run a session until it ends.
pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.switchboard.is_accepting() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let attributes = request_attributes(&headers, peer);
    let limit = state.switchboard.config().max_message_size;

    ws.max_message_size(limit)
        .on_failed_upgrade(move |e| {
            warn!(peer = ?peer, error = %e, "web-socket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let transport = WebSocketTransport::new(socket).with_peer(peer);
            if let Err(e) = state.switchboard.handle(transport, attributes).await {
                debug!(peer = ?peer, error = %e, "session refused");
            }
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
