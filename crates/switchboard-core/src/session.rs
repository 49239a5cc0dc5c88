//! Managed session: one transport, one outbound queue, two loops.
//!
//! ```text
//!  transport ──read──▶ input loop ──▶ EventHandler callbacks
//!                                         │ write / broadcast
//!                                         ▼
//!  transport ◀─write── output loop ◀── OutboundQueue
//! ```
//!
//! The input loop is the controlling loop: any read error ends it and starts
//! teardown. The output loop drains the queue, sends a ping whenever the
//! queue stays idle for a full ping period, and exits on a write error, after
//! writing a close message, or when the queue is disposed. Whichever loop
//! exits first moves the session to [`SessionState::Closing`], which disposes
//! the queue and cancels the other loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::errors::{QueueError, SessionError};
use crate::handler::EventHandler;
use crate::ids::SessionId;
use crate::message::{CloseFrame, Message, MessageKind};
use crate::queue::OutboundQueue;
use crate::telemetry;
use crate::transport::{TransportReader, TransportWriter};

/// Control replies (pongs, close echoes) waiting for the output loop.
const CONTROL_CAPACITY: usize = 16;

/// Lifecycle of a session. Moves forward only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Both loops running; writes are accepted.
    Open,
    /// Teardown started; the queue is disposed.
    Closing,
    /// Both loops finished and the transport is released.
    Closed,
}

/// One managed connection.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    handler: Arc<dyn EventHandler>,
    attributes: RwLock<HashMap<String, Value>>,
    outbound: OutboundQueue,
    state: Mutex<SessionState>,
    control: mpsc::Sender<Message>,
    transport_replies: bool,
    peer: Option<SocketAddr>,
    cancel: CancellationToken,
    connected_at: std::time::Instant,
    dropped: AtomicU64,
    this: Weak<Session>,
}

impl Session {
    pub(crate) fn new(
        config: SessionConfig,
        handler: Arc<dyn EventHandler>,
        attributes: HashMap<String, Value>,
        peer: Option<SocketAddr>,
        transport_replies: bool,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let session = Arc::new_cyclic(|this| Self {
            id: SessionId::new(),
            outbound: OutboundQueue::new(config.message_buffer_size),
            config,
            handler,
            attributes: RwLock::new(attributes),
            state: Mutex::new(SessionState::Open),
            control,
            transport_replies,
            peer,
            cancel: CancellationToken::new(),
            connected_at: std::time::Instant::now(),
            dropped: AtomicU64::new(0),
            this: this.clone(),
        });
        (session, control_rx)
    }

    /// Unique session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Remote address, when the transport reported one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the session no longer accepts writes.
    pub fn is_closed(&self) -> bool {
        self.state() != SessionState::Open
    }

    /// Time since the session was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Messages dropped because the outbound queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Configuration this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── producer API ────────────────────────────────────────────────

    /// Queue a text message.
    pub fn write(&self, payload: impl Into<Bytes>) -> Result<(), SessionError> {
        self.enqueue(Message::text(payload))
    }

    /// Queue a binary message.
    pub fn write_binary(&self, payload: impl Into<Bytes>) -> Result<(), SessionError> {
        self.enqueue(Message::binary(payload))
    }

    /// Queue a close message with no status. The output loop exits after
    /// writing it.
    pub fn close(&self) -> Result<(), SessionError> {
        self.enqueue(Message::close(&CloseFrame::default()))
    }

    /// Queue a close message carrying `code` and `reason`.
    pub fn close_with_payload(&self, code: u16, reason: &str) -> Result<(), SessionError> {
        self.enqueue(Message::close(&CloseFrame::new(code, reason)))
    }

    /// Non-blocking enqueue, checked against the session state under its lock
    /// so a write cannot slip in after teardown has disposed the queue.
    ///
    /// A full queue drops the message, returns [`SessionError::Backpressure`]
    /// and also reports it through the error callback.
    pub(crate) fn enqueue(&self, message: Message) -> Result<(), SessionError> {
        let put = {
            let state = self.state.lock();
            if *state != SessionState::Open {
                return Err(SessionError::Closed);
            }
            self.outbound.put(message)
        };
        match put {
            Ok(()) => Ok(()),
            Err(QueueError::Full) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(telemetry::MESSAGES_DROPPED_TOTAL).increment(1);
                self.report_backpressure();
                Err(SessionError::Backpressure)
            }
            Err(QueueError::Disposed | QueueError::Timeout) => Err(SessionError::Closed),
        }
    }

    /// Producers may be synchronous, so the callback runs on its own task.
    fn report_backpressure(&self) {
        let Some(session) = self.this.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn(async move {
                session.report_error(&SessionError::Backpressure).await;
            })),
            Err(_) => {
                warn!(session_id = %self.id, "message dropped outside a runtime, error callback skipped");
            }
        }
    }

    /// Reply to a peer close frame, unless the transport already does so.
    pub fn echo_close(&self, code: Option<u16>, reason: &str) -> Result<(), SessionError> {
        if self.transport_replies {
            return Ok(());
        }
        let frame = CloseFrame {
            code,
            reason: reason.to_owned(),
        };
        self.send_control(Message::close(&frame))
    }

    fn send_control(&self, message: Message) -> Result<(), SessionError> {
        self.control.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    // ── attributes ──────────────────────────────────────────────────

    /// Attribute value, or `None` when the key is absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    /// Set an attribute, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.attributes.write().insert(key.into(), value.into());
    }

    /// Attribute value, or [`SessionError::AttributeNotFound`].
    pub fn require(&self, key: &str) -> Result<Value, SessionError> {
        self.get(key)
            .ok_or_else(|| SessionError::AttributeNotFound(key.to_owned()))
    }

    /// Remove an attribute, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }

    /// Snapshot of the attribute keys.
    pub fn keys(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }

    // ── engine ──────────────────────────────────────────────────────

    pub(crate) async fn report_error(self: &Arc<Self>, error: &SessionError) {
        self.handler.on_error(self, error).await;
    }

    /// Start teardown. Returns `false` if it had already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Open {
                return false;
            }
            *state = SessionState::Closing;
            self.outbound.dispose();
        }
        self.cancel.cancel();
        true
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    #[cfg(test)]
    pub(crate) fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Input loop. Returns when a read fails, a close frame arrives, or the
    /// output loop has started teardown.
    pub(crate) async fn run_input<R: TransportReader>(self: &Arc<Self>, mut reader: R) {
        let pong_wait = self.config.pong_wait;
        reader.set_read_limit(self.config.max_message_size);
        reader.set_read_deadline(Some(Instant::now() + pong_wait));

        loop {
            let read = tokio::select! {
                () = self.cancel.cancelled() => break,
                read = reader.read_message() => read,
            };
            let message = match read {
                Ok(message) => message,
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        counter!(telemetry::TRANSPORT_ERRORS_TOTAL, "direction" => "read")
                            .increment(1);
                        debug!(session_id = %self.id, error = %e, "read failed");
                        self.report_error(&e.into()).await;
                    }
                    break;
                }
            };

            match message.kind {
                MessageKind::Text => self.handler.on_message(self, message.payload).await,
                MessageKind::Binary => {
                    self.handler
                        .on_message_binary(self, message.payload)
                        .await;
                }
                MessageKind::Ping => {
                    reader.set_read_deadline(Some(Instant::now() + pong_wait));
                    if !reader.replies_to_control()
                        && let Err(e) = self.send_control(Message::pong(message.payload))
                    {
                        warn!(session_id = %self.id, error = %e, "pong reply not queued");
                    }
                }
                MessageKind::Pong => {
                    reader.set_read_deadline(Some(Instant::now() + pong_wait));
                    self.handler.on_pong(self).await;
                }
                MessageKind::Close => {
                    let frame = CloseFrame::decode(&message.payload);
                    debug!(session_id = %self.id, code = ?frame.code, reason = %frame.reason, "peer sent close");
                    if let Err(e) = self.handler.on_close(self, frame.code, &frame.reason).await {
                        self.report_error(&e).await;
                    }
                    break;
                }
            }
        }
    }

    /// Output loop. Control replies take priority over queued messages.
    pub(crate) async fn run_output<W: TransportWriter>(
        self: Arc<Self>,
        mut writer: W,
        mut control: mpsc::Receiver<Message>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                Some(reply) = control.recv() => Ok(reply),
                queued = self.outbound.get(self.config.ping_period) => queued,
            };
            let message = match next {
                Ok(message) => message,
                Err(QueueError::Timeout) => {
                    counter!(telemetry::PINGS_SENT_TOTAL).increment(1);
                    Message::ping(Bytes::new())
                }
                Err(QueueError::Disposed | QueueError::Full) => break,
            };

            let kind = message.kind;
            let payload = message.payload.clone();
            writer.set_write_deadline(Some(Instant::now() + self.config.write_wait));
            if let Err(e) = writer.write_message(message).await {
                counter!(telemetry::TRANSPORT_ERRORS_TOTAL, "direction" => "write").increment(1);
                debug!(session_id = %self.id, error = %e, kind = %kind, "write failed");
                self.report_error(&e.into()).await;
                break;
            }

            match kind {
                MessageKind::Close => break,
                MessageKind::Text => self.handler.on_sent(&self, payload).await,
                MessageKind::Binary => self.handler.on_sent_binary(&self, payload).await,
                MessageKind::Ping | MessageKind::Pong => {}
            }
        }

        writer.set_write_deadline(Some(Instant::now() + self.config.write_wait));
        if let Err(e) = writer.close().await {
            debug!(session_id = %self.id, error = %e, "transport close failed");
        }
        let _ = self.begin_teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::message::close_code;
    use crate::testutil::{RecordingHandler, detached_session, detached_session_with, recorded_session};

    // ── writes ──

    #[test]
    fn write_queues_text() {
        let (session, _control) = detached_session();
        session.write("hello").unwrap();
        session.write_binary(vec![1, 2]).unwrap();
        let queue = session.outbound();
        assert_eq!(queue.try_get().unwrap(), Some(Message::text("hello")));
        assert_eq!(queue.try_get().unwrap(), Some(Message::binary(vec![1, 2])));
    }

    #[test]
    fn close_queues_empty_close_payload() {
        let (session, _control) = detached_session();
        session.close().unwrap();
        let queued = session.outbound().try_get().unwrap().unwrap();
        assert_eq!(queued.kind, MessageKind::Close);
        assert!(queued.payload.is_empty());
    }

    #[test]
    fn close_with_payload_encodes_code_and_reason() {
        let (session, _control) = detached_session();
        session
            .close_with_payload(close_code::GOING_AWAY, "restart")
            .unwrap();
        let queued = session.outbound().try_get().unwrap().unwrap();
        assert_eq!(
            CloseFrame::decode(&queued.payload),
            CloseFrame::new(1001, "restart")
        );
    }

    #[test]
    fn full_queue_reports_backpressure_and_counts_drop() {
        let config = SessionConfig {
            message_buffer_size: 1,
            ..SessionConfig::default()
        };
        let (session, _control) = detached_session_with(config, false);
        session.write("first").unwrap();
        assert_matches!(session.write("second"), Err(SessionError::Backpressure));
        assert_eq!(session.dropped_messages(), 1);
        assert_eq!(
            session.outbound().try_get().unwrap(),
            Some(Message::text("first"))
        );
    }

    #[tokio::test]
    async fn dropped_write_reaches_error_callback() {
        let handler = Arc::new(RecordingHandler::default());
        let config = SessionConfig {
            message_buffer_size: 1,
            ..SessionConfig::default()
        };
        let (session, _control) = recorded_session(&handler, config);
        session.write("a").unwrap();
        assert_matches!(session.write("b"), Err(SessionError::Backpressure));
        assert_matches!(session.write_binary(vec![0]), Err(SessionError::Backpressure));

        let errors = handler.wait_for_errors(2).await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|(id, e)| id == session.id() && e.contains("queue full")));
        assert_eq!(session.dropped_messages(), 2);
    }

    #[tokio::test]
    async fn successful_write_reports_nothing() {
        let handler = Arc::new(RecordingHandler::default());
        let (session, _control) = recorded_session(&handler, SessionConfig::default());
        session.write("fits").unwrap();
        tokio::task::yield_now().await;
        assert!(handler.errors().is_empty());
    }

    #[test]
    fn writes_after_teardown_fail_closed() {
        let (session, _control) = detached_session();
        assert!(session.begin_teardown());
        assert_eq!(session.state(), SessionState::Closing);
        assert!(session.is_closed());
        assert_matches!(session.write("late"), Err(SessionError::Closed));
        assert_matches!(session.write_binary(vec![0]), Err(SessionError::Closed));
        assert_matches!(session.close(), Err(SessionError::Closed));
        assert_matches!(
            session.close_with_payload(1000, "bye"),
            Err(SessionError::Closed)
        );
    }

    #[test]
    fn teardown_runs_once() {
        let (session, _control) = detached_session();
        assert!(session.begin_teardown());
        assert!(!session.begin_teardown());
        session.mark_closed();
        assert!(!session.begin_teardown());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn teardown_disposes_queue() {
        let (session, _control) = detached_session();
        session.write("pending").unwrap();
        let _ = session.begin_teardown();
        assert!(session.outbound().is_disposed());
    }

    // ── control replies ──

    #[test]
    fn echo_close_goes_to_control_channel() {
        let (session, mut control) = detached_session();
        session.echo_close(Some(1000), "bye").unwrap();
        let reply = control.try_recv().unwrap();
        assert_eq!(reply, Message::close(&CloseFrame::new(1000, "bye")));
    }

    #[test]
    fn echo_close_is_noop_when_transport_replies() {
        let (session, mut control) = detached_session_with(SessionConfig::default(), true);
        session.echo_close(Some(1000), "bye").unwrap();
        assert!(control.try_recv().is_err());
    }

    #[test]
    fn echo_close_after_output_loop_gone_is_closed() {
        let (session, control) = detached_session();
        drop(control);
        assert_matches!(session.echo_close(None, ""), Err(SessionError::Closed));
    }

    // ── attributes ──

    #[test]
    fn attributes_get_set_remove() {
        let (session, _control) = detached_session();
        assert_eq!(session.get("user"), None);
        session.set("user", "alice");
        session.set("rooms", serde_json::json!(["a", "b"]));
        assert_eq!(session.get("user"), Some(Value::from("alice")));
        assert_eq!(session.get("rooms").unwrap()[1], "b");

        let mut keys = session.keys();
        keys.sort();
        assert_eq!(keys, vec!["rooms".to_string(), "user".to_string()]);

        assert_eq!(session.remove("user"), Some(Value::from("alice")));
        assert_eq!(session.get("user"), None);
    }

    #[test]
    fn require_missing_attribute_is_an_error() {
        let (session, _control) = detached_session();
        assert_matches!(
            session.require("token"),
            Err(SessionError::AttributeNotFound(key)) if key == "token"
        );
        session.set("token", 42);
        assert_eq!(session.require("token").unwrap(), 42);
    }

    #[test]
    fn debug_includes_id_and_state() {
        let (session, _control) = detached_session();
        let dbg = format!("{session:?}");
        assert!(dbg.contains(session.id().as_str()));
        assert!(dbg.contains("Open"));
    }
}
