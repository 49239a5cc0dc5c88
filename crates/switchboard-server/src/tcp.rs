//! Raw TCP listener for the length-prefixed stream transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_core::{StreamTransport, Switchboard};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::upgrade::PEER_ATTRIBUTE;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` fires, running each as a session.
///
/// Sessions already running are not interrupted; closing the hub ends them.
pub async fn serve_tcp(
    listener: TcpListener,
    switchboard: Arc<Switchboard>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "raw TCP listener started");
    }

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }
        if !switchboard.is_accepting() {
            debug!(%peer, "not accepting, dropping connection");
            continue;
        }

        let mut attributes = HashMap::new();
        let _ = attributes.insert(PEER_ATTRIBUTE.to_string(), Value::String(peer.to_string()));
        let switchboard = Arc::clone(&switchboard);
        drop(tokio::spawn(async move {
            let transport = StreamTransport::from_tcp(stream);
            if let Err(e) = switchboard.handle(transport, attributes).await {
                debug!(%peer, error = %e, "session refused");
            }
        }));
    }

    info!("raw TCP listener stopped");
}
