//! Application callbacks.
//!
//! Every method has a default, so an application implements only the events
//! it cares about and the engine can invoke all of them unconditionally.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::errors::SessionError;
use crate::session::Session;

/// Callbacks invoked by the session engine.
///
/// Input callbacks (`on_message`, `on_message_binary`, `on_pong`,
/// `on_close`) run on the session's input loop and are awaited before the
/// next read, so input for one session is handled in order.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// A session was accepted. Runs before either loop starts.
    async fn on_connect(&self, _session: &Arc<Session>) {}

    /// A session finished teardown. Runs exactly once per session.
    async fn on_disconnect(&self, _session: &Arc<Session>) {}

    /// A text message arrived.
    async fn on_message(&self, _session: &Arc<Session>, _payload: Bytes) {}

    /// A binary message arrived.
    async fn on_message_binary(&self, _session: &Arc<Session>, _payload: Bytes) {}

    /// A text message was written to the transport.
    async fn on_sent(&self, _session: &Arc<Session>, _payload: Bytes) {}

    /// A binary message was written to the transport.
    async fn on_sent_binary(&self, _session: &Arc<Session>, _payload: Bytes) {}

    /// A transport failure, a dropped broadcast, or a failed close callback.
    async fn on_error(&self, session: &Arc<Session>, error: &SessionError) {
        debug!(session_id = %session.id(), %error, "unhandled session error");
    }

    /// A pong arrived and the read deadline was extended.
    async fn on_pong(&self, _session: &Arc<Session>) {}

    /// The peer sent a close frame. The input loop exits after this returns.
    ///
    /// The default echoes the close frame back to the peer.
    async fn on_close(
        &self,
        session: &Arc<Session>,
        code: Option<u16>,
        reason: &str,
    ) -> Result<(), SessionError> {
        session.echo_close(code, reason)
    }
}

/// Handler that keeps every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {}
