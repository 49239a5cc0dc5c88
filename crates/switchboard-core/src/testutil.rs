//! Helpers shared by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::handler::{EventHandler, NoopHandler};
use crate::ids::SessionId;
use crate::message::Message;
use crate::session::Session;

/// Session with no loops attached, backed by the no-op handler.
pub(crate) fn detached_session() -> (Arc<Session>, mpsc::Receiver<Message>) {
    detached_session_with(SessionConfig::default(), false)
}

pub(crate) fn detached_session_with(
    config: SessionConfig,
    transport_replies: bool,
) -> (Arc<Session>, mpsc::Receiver<Message>) {
    Session::new(
        config,
        Arc::new(NoopHandler),
        HashMap::new(),
        None,
        transport_replies,
    )
}

/// Session whose errors land in `handler`.
pub(crate) fn recorded_session(
    handler: &Arc<RecordingHandler>,
    config: SessionConfig,
) -> (Arc<Session>, mpsc::Receiver<Message>) {
    let handler: Arc<dyn EventHandler> = handler.clone();
    Session::new(config, handler, HashMap::new(), None, false)
}

/// Records `on_error` calls.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    errors: Mutex<Vec<(SessionId, String)>>,
}

impl RecordingHandler {
    pub(crate) fn errors(&self) -> Vec<(SessionId, String)> {
        self.errors.lock().clone()
    }

    /// Poll until at least `count` errors arrived or two seconds passed.
    pub(crate) async fn wait_for_errors(&self, count: usize) -> Vec<(SessionId, String)> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.errors.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.errors()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_error(&self, session: &Arc<Session>, error: &SessionError) {
        self.errors
            .lock()
            .push((session.id().clone(), error.to_string()));
    }
}
