//! Session registry with sharded broadcast fan-out.
//!
//! Registry mutations (register, unregister, shutdown) are serialized
//! through one control task, the only writer of the member map. Broadcasts
//! are handed round-robin to a fixed pool of shard workers; each worker takes
//! a read lock to snapshot the members and pushes the message into every
//! accepted session's outbound queue without blocking. A full queue drops the
//! message for that session and reports it through the session's error
//! callback.
//!
//! The worker tasks own only the registry and their receivers. Dropping the
//! last `Hub` clone closes every channel, so the workers exit even without
//! an explicit close.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::errors::{ConfigError, HubError, SessionError};
use crate::ids::SessionId;
use crate::message::{CloseFrame, Envelope, Filter, Message};
use crate::session::Session;
use crate::telemetry;

enum Command {
    Register(Arc<Session>, oneshot::Sender<bool>),
    Unregister(SessionId, oneshot::Sender<bool>),
    Shutdown(Message, oneshot::Sender<usize>),
}

type Registry = Arc<RwLock<HashMap<SessionId, Arc<Session>>>>;

struct HubInner {
    sessions: Registry,
    open: AtomicBool,
    control: mpsc::Sender<Command>,
    shards: RwLock<Vec<mpsc::Sender<Envelope>>>,
    next_shard: AtomicUsize,
}

/// Registry of sessions supporting filtered broadcast and bulk shutdown.
///
/// Cheap to clone; clones share the same registry and workers.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Start a hub: one control task plus `config.shards` delivery workers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: &HubConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (control, control_rx) = mpsc::channel(config.session_capacity);
        let mut shards = Vec::with_capacity(config.shards);
        let mut shard_receivers = Vec::with_capacity(config.shards);
        for _ in 0..config.shards {
            let (tx, rx) = mpsc::channel(config.shard_capacity);
            shards.push(tx);
            shard_receivers.push(rx);
        }

        let registry: Registry = Arc::default();
        let inner = Arc::new(HubInner {
            sessions: Arc::clone(&registry),
            open: AtomicBool::new(true),
            control,
            shards: RwLock::new(shards),
            next_shard: AtomicUsize::new(0),
        });

        drop(tokio::spawn(run_control(Arc::clone(&registry), control_rx)));
        for (index, rx) in shard_receivers.into_iter().enumerate() {
            drop(tokio::spawn(run_shard(Arc::clone(&registry), index, rx)));
        }
        debug!(shards = config.shards, "hub started");

        Ok(Self { inner })
    }

    /// Whether the hub has been shut down.
    pub fn is_closed(&self) -> bool {
        !self.inner.open.load(Ordering::Acquire)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.sessions.read().values().cloned().collect()
    }

    // ── registry ────────────────────────────────────────────────────

    /// Add a session. Returns `false` if it was already registered.
    pub async fn register(&self, session: Arc<Session>) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Register(session, ack)).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub async fn unregister(&self, session: &Session) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Unregister(session.id().clone(), ack))
            .await?;
        done.await.map_err(|_| HubError::Closed)
    }

    async fn command(&self, command: Command) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        self.inner
            .control
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    // ── broadcast ───────────────────────────────────────────────────

    /// Send a text message to every session.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.dispatch(Envelope::new(Message::text(payload))).await
    }

    /// Send a text message to every session accepted by `filter`.
    pub async fn broadcast_filter<F>(
        &self,
        payload: impl Into<Bytes>,
        filter: F,
    ) -> Result<(), HubError>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        let filter: Filter = Arc::new(filter);
        self.dispatch(Envelope::filtered(Message::text(payload), filter))
            .await
    }

    /// Send a text message to every session except `skip`.
    pub async fn broadcast_others(
        &self,
        payload: impl Into<Bytes>,
        skip: &Session,
    ) -> Result<(), HubError> {
        let skip = skip.id().clone();
        self.broadcast_filter(payload, move |s| *s.id() != skip)
            .await
    }

    /// Send a binary message to every session.
    pub async fn broadcast_binary(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.dispatch(Envelope::new(Message::binary(payload))).await
    }

    /// Send a binary message to every session accepted by `filter`.
    pub async fn broadcast_binary_filter<F>(
        &self,
        payload: impl Into<Bytes>,
        filter: F,
    ) -> Result<(), HubError>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        let filter: Filter = Arc::new(filter);
        self.dispatch(Envelope::filtered(Message::binary(payload), filter))
            .await
    }

    /// Send a binary message to every session except `skip`.
    pub async fn broadcast_binary_others(
        &self,
        payload: impl Into<Bytes>,
        skip: &Session,
    ) -> Result<(), HubError> {
        let skip = skip.id().clone();
        self.broadcast_binary_filter(payload, move |s| *s.id() != skip)
            .await
    }

    /// Write a text message directly to each of `sessions`, stopping at the
    /// first failure.
    ///
    /// Bypasses the shard workers; the sessions need not be registered.
    pub fn broadcast_multiple(
        &self,
        payload: impl Into<Bytes>,
        sessions: &[Arc<Session>],
    ) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let payload = payload.into();
        for session in sessions {
            session.write(payload.clone())?;
        }
        Ok(())
    }

    /// Hand an envelope to the next shard worker.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let shard = {
            let shards = self.inner.shards.read();
            if shards.is_empty() {
                return Err(HubError::Closed);
            }
            let index = self.inner.next_shard.fetch_add(1, Ordering::Relaxed) % shards.len();
            shards[index].clone()
        };
        counter!(telemetry::BROADCASTS_TOTAL, "kind" => envelope.kind().as_str()).increment(1);
        shard.send(envelope).await.map_err(|_| HubError::Closed)
    }

    // ── shutdown ────────────────────────────────────────────────────

    /// Shut down: queue a close message (no status) for every member, clear
    /// the registry and stop the workers.
    pub async fn close(&self) -> Result<(), HubError> {
        self.shutdown(Message::close(&CloseFrame::default())).await
    }

    /// Shut down, sending every member a close carrying `code` and `reason`.
    pub async fn close_with_message(&self, code: u16, reason: &str) -> Result<(), HubError> {
        self.shutdown(Message::close(&CloseFrame::new(code, reason)))
            .await
    }

    async fn shutdown(&self, close: Message) -> Result<(), HubError> {
        if self
            .inner
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HubError::Closed);
        }
        let (ack, done) = oneshot::channel();
        self.inner
            .control
            .send(Command::Shutdown(close, ack))
            .await
            .map_err(|_| HubError::Closed)?;
        let notified = done.await.map_err(|_| HubError::Closed)?;
        self.inner.shards.write().clear();
        info!(sessions = notified, "hub shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_control(registry: Registry, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register(session, ack) => {
                let inserted = {
                    let mut sessions = registry.write();
                    let inserted = sessions
                        .insert(session.id().clone(), session)
                        .is_none();
                    gauge!(telemetry::HUB_SESSIONS).set(sessions.len() as f64);
                    inserted
                };
                let _ = ack.send(inserted);
            }
            Command::Unregister(id, ack) => {
                let removed = {
                    let mut sessions = registry.write();
                    let removed = sessions.remove(&id).is_some();
                    gauge!(telemetry::HUB_SESSIONS).set(sessions.len() as f64);
                    removed
                };
                let _ = ack.send(removed);
            }
            Command::Shutdown(close, ack) => {
                let members: Vec<Arc<Session>> = {
                    let mut sessions = registry.write();
                    sessions.drain().map(|(_, session)| session).collect()
                };
                gauge!(telemetry::HUB_SESSIONS).set(0.0);
                for session in &members {
                    match session.enqueue(close.clone()) {
                        Ok(()) => {}
                        Err(SessionError::Backpressure) => {
                            // No close frame will reach this peer; end it now.
                            warn!(session_id = %session.id(), "close not queued, tearing session down");
                            let _ = session.begin_teardown();
                        }
                        Err(e) => {
                            debug!(session_id = %session.id(), error = %e, "close not queued");
                        }
                    }
                }
                let _ = ack.send(members.len());
                break;
            }
        }
    }
    debug!("hub control task stopped");
}

async fn run_shard(registry: Registry, index: usize, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let members: Vec<Arc<Session>> = registry.read().values().cloned().collect();

        let mut delivered = 0usize;
        let mut dropped = 0usize;
        for session in members {
            if !envelope.accepts(&session) {
                continue;
            }
            // enqueue reports backpressure to the session's error callback
            match session.enqueue(envelope.message().clone()) {
                Ok(()) => delivered += 1,
                Err(SessionError::Backpressure) => {
                    dropped += 1;
                    warn!(session_id = %session.id(), shard = index, "broadcast dropped, outbound queue full");
                }
                Err(e) => {
                    debug!(session_id = %session.id(), error = %e, "skipping session");
                }
            }
        }

        debug!(shard = index, kind = %envelope.kind(), delivered, dropped, "broadcast delivered");
    }
    debug!(shard = index, "shard worker stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use crate::config::SessionConfig;
    use crate::message::{MessageKind, close_code};
    use crate::queue::OutboundQueue;
    use crate::testutil::{RecordingHandler, detached_session, recorded_session};

    const WAIT: Duration = Duration::from_secs(2);

    /// One shard keeps broadcasts in request order, which the "did not
    /// receive" assertions rely on.
    fn single_shard_hub() -> Hub {
        Hub::new(&HubConfig {
            shards: 1,
            ..HubConfig::default()
        })
        .unwrap()
    }

    async fn next(queue: &OutboundQueue) -> Message {
        queue.get(WAIT).await.expect("message should arrive")
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let hub = single_shard_hub();
        let (a, _ca) = detached_session();
        let (b, _cb) = detached_session();

        assert!(hub.is_empty());
        assert!(hub.register(Arc::clone(&a)).await.unwrap());
        assert!(hub.register(Arc::clone(&b)).await.unwrap());
        assert_eq!(hub.len(), 2);

        assert!(hub.unregister(&a).await.unwrap());
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.sessions()[0].id(), b.id());
    }

    #[tokio::test]
    async fn double_register_and_unregister_are_idempotent() {
        let hub = single_shard_hub();
        let (a, _ca) = detached_session();

        assert!(hub.register(Arc::clone(&a)).await.unwrap());
        assert!(!hub.register(Arc::clone(&a)).await.unwrap());
        assert_eq!(hub.len(), 1);

        assert!(hub.unregister(&a).await.unwrap());
        assert!(!hub.unregister(&a).await.unwrap());
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let hub = Hub::new(&HubConfig::default()).unwrap();
        let mut members = Vec::new();
        for _ in 0..5 {
            let (session, control) = detached_session();
            let _ = hub.register(Arc::clone(&session)).await.unwrap();
            members.push((session, control));
        }

        hub.broadcast("hello").await.unwrap();
        for (session, _) in &members {
            assert_eq!(next(session.outbound()).await, Message::text("hello"));
        }
    }

    #[tokio::test]
    async fn broadcast_filter_selects_subset() {
        let hub = single_shard_hub();
        let (red, _c1) = detached_session();
        let (blue, _c2) = detached_session();
        red.set("team", "red");
        blue.set("team", "blue");
        let _ = hub.register(Arc::clone(&red)).await.unwrap();
        let _ = hub.register(Arc::clone(&blue)).await.unwrap();

        hub.broadcast_filter("red only", |s| {
            s.get("team").is_some_and(|team| team == "red")
        })
        .await
        .unwrap();
        hub.broadcast("everyone").await.unwrap();

        assert_eq!(next(red.outbound()).await, Message::text("red only"));
        assert_eq!(next(red.outbound()).await, Message::text("everyone"));
        assert_eq!(next(blue.outbound()).await, Message::text("everyone"));
    }

    #[tokio::test]
    async fn broadcast_others_skips_sender() {
        let hub = single_shard_hub();
        let (sender, _c1) = detached_session();
        let (peer, _c2) = detached_session();
        let _ = hub.register(Arc::clone(&sender)).await.unwrap();
        let _ = hub.register(Arc::clone(&peer)).await.unwrap();

        hub.broadcast_others("from sender", &sender).await.unwrap();
        hub.broadcast("marker").await.unwrap();

        assert_eq!(next(peer.outbound()).await, Message::text("from sender"));
        assert_eq!(next(sender.outbound()).await, Message::text("marker"));
    }

    #[tokio::test]
    async fn broadcast_others_with_single_member_delivers_nothing() {
        let hub = single_shard_hub();
        let (only, _c) = detached_session();
        let _ = hub.register(Arc::clone(&only)).await.unwrap();

        hub.broadcast_others("nobody", &only).await.unwrap();
        hub.broadcast("marker").await.unwrap();
        assert_eq!(next(only.outbound()).await, Message::text("marker"));
        assert!(only.outbound().is_empty());
    }

    #[tokio::test]
    async fn binary_broadcast_variants() {
        let hub = single_shard_hub();
        let (a, _c1) = detached_session();
        let (b, _c2) = detached_session();
        let _ = hub.register(Arc::clone(&a)).await.unwrap();
        let _ = hub.register(Arc::clone(&b)).await.unwrap();

        hub.broadcast_binary(vec![1]).await.unwrap();
        hub.broadcast_binary_others(vec![2], &a).await.unwrap();
        let a_id = a.id().clone();
        hub.broadcast_binary_filter(vec![3], move |s| *s.id() == a_id)
            .await
            .unwrap();

        assert_eq!(next(a.outbound()).await, Message::binary(vec![1]));
        assert_eq!(next(a.outbound()).await, Message::binary(vec![3]));
        assert_eq!(next(b.outbound()).await, Message::binary(vec![1]));
        assert_eq!(next(b.outbound()).await, Message::binary(vec![2]));
    }

    #[tokio::test]
    async fn unregistered_sessions_miss_broadcasts() {
        let hub = single_shard_hub();
        let (stays, _c1) = detached_session();
        let (leaves, _c2) = detached_session();
        let _ = hub.register(Arc::clone(&stays)).await.unwrap();
        let _ = hub.register(Arc::clone(&leaves)).await.unwrap();
        let _ = hub.unregister(&leaves).await.unwrap();

        hub.broadcast("after").await.unwrap();
        assert_eq!(next(stays.outbound()).await, Message::text("after"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(leaves.outbound().is_empty());
    }

    #[tokio::test]
    async fn full_member_queue_reports_backpressure() {
        let hub = single_shard_hub();
        let handler = Arc::new(RecordingHandler::default());
        let config = SessionConfig {
            message_buffer_size: 1,
            ..SessionConfig::default()
        };
        let (slow, _c1) = recorded_session(&handler, config);
        let (fast, _c2) = detached_session();
        let _ = hub.register(Arc::clone(&slow)).await.unwrap();
        let _ = hub.register(Arc::clone(&fast)).await.unwrap();

        hub.broadcast("one").await.unwrap();
        hub.broadcast("two").await.unwrap();

        assert_eq!(next(fast.outbound()).await, Message::text("one"));
        assert_eq!(next(fast.outbound()).await, Message::text("two"));

        let errors = handler.wait_for_errors(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.errors().len(), 1, "backpressure reported once");
        assert_eq!(&errors[0].0, slow.id());
        assert!(errors[0].1.contains("queue full"));
        assert_eq!(next(slow.outbound()).await, Message::text("one"));
        assert_eq!(slow.dropped_messages(), 1);
    }

    #[tokio::test]
    async fn broadcast_multiple_writes_directly() {
        let hub = single_shard_hub();
        let (a, _c1) = detached_session();
        let (b, _c2) = detached_session();

        hub.broadcast_multiple("direct", &[Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        assert_eq!(a.outbound().try_get().unwrap(), Some(Message::text("direct")));
        assert_eq!(b.outbound().try_get().unwrap(), Some(Message::text("direct")));
    }

    #[test]
    fn broadcast_multiple_stops_at_first_failure() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let hub = single_shard_hub();
        let (a, _c1) = detached_session();
        let (closed, _c2) = detached_session();
        let (c, _c3) = detached_session();
        let _ = closed.begin_teardown();

        let result = hub.broadcast_multiple(
            "direct",
            &[Arc::clone(&a), Arc::clone(&closed), Arc::clone(&c)],
        );
        assert_matches!(result, Err(HubError::Write(SessionError::Closed)));
        assert_eq!(a.outbound().len(), 1);
        assert!(c.outbound().is_empty());
    }

    #[tokio::test]
    async fn close_notifies_members_and_clears_registry() {
        let hub = Hub::new(&HubConfig::default()).unwrap();
        let (a, _c1) = detached_session();
        let (b, _c2) = detached_session();
        let _ = hub.register(Arc::clone(&a)).await.unwrap();
        let _ = hub.register(Arc::clone(&b)).await.unwrap();

        hub.close().await.unwrap();
        assert!(hub.is_closed());
        assert!(hub.is_empty());
        for session in [&a, &b] {
            let close = session.outbound().try_get().unwrap().unwrap();
            assert_eq!(close.kind, MessageKind::Close);
            assert!(close.payload.is_empty());
        }
    }

    #[tokio::test]
    async fn close_with_message_carries_payload() {
        let hub = single_shard_hub();
        let (a, _c1) = detached_session();
        let _ = hub.register(Arc::clone(&a)).await.unwrap();

        hub.close_with_message(close_code::GOING_AWAY, "maintenance")
            .await
            .unwrap();
        let close = a.outbound().try_get().unwrap().unwrap();
        assert_eq!(
            CloseFrame::decode(&close.payload),
            CloseFrame::new(1001, "maintenance")
        );
    }

    #[tokio::test]
    async fn closed_hub_rejects_everything() {
        let hub = single_shard_hub();
        hub.close().await.unwrap();

        let (a, _c) = detached_session();
        assert_matches!(hub.register(Arc::clone(&a)).await, Err(HubError::Closed));
        assert_matches!(hub.unregister(&a).await, Err(HubError::Closed));
        assert_matches!(hub.broadcast("x").await, Err(HubError::Closed));
        assert_matches!(hub.broadcast_others("x", &a).await, Err(HubError::Closed));
        assert_matches!(hub.broadcast_binary(vec![0]).await, Err(HubError::Closed));
        assert_matches!(
            hub.broadcast_multiple("x", &[Arc::clone(&a)]),
            Err(HubError::Closed)
        );
        assert_matches!(hub.close().await, Err(HubError::Closed));
        assert_matches!(
            hub.close_with_message(1000, "again").await,
            Err(HubError::Closed)
        );
        assert!(a.outbound().is_empty());
    }

    #[tokio::test]
    async fn concurrent_close_runs_once() {
        let hub = single_shard_hub();
        let (a, _c) = detached_session();
        let _ = hub.register(Arc::clone(&a)).await.unwrap();

        let (first, second) = tokio::join!(hub.close(), hub.close());
        assert!(first.is_ok() != second.is_ok());
        assert_eq!(a.outbound().len(), 1);
    }

    #[tokio::test]
    async fn close_tears_down_member_with_full_queue() {
        let hub = single_shard_hub();
        let config = SessionConfig {
            message_buffer_size: 1,
            ..SessionConfig::default()
        };
        let handler = Arc::new(RecordingHandler::default());
        let (stuck, _c1) = recorded_session(&handler, config);
        let (ok, _c2) = detached_session();
        stuck.write("backlog").unwrap();
        let _ = hub.register(Arc::clone(&stuck)).await.unwrap();
        let _ = hub.register(Arc::clone(&ok)).await.unwrap();

        hub.close().await.unwrap();
        assert!(stuck.is_closed());
        assert!(stuck.outbound().is_disposed());
        assert!(!ok.is_closed());
        assert_eq!(ok.outbound().try_get().unwrap().unwrap().kind, MessageKind::Close);
    }

    #[tokio::test]
    async fn dropped_hub_stops_its_workers() {
        let hub = Hub::new(&HubConfig {
            shards: 4,
            ..HubConfig::default()
        })
        .unwrap();
        let (member, _c) = detached_session();
        let _ = hub.register(Arc::clone(&member)).await.unwrap();
        let registry = Arc::downgrade(&hub.inner.sessions);
        let clone = hub.clone();

        drop(hub);
        clone.broadcast("still running").await.unwrap();
        assert_eq!(next(member.outbound()).await, Message::text("still running"));

        drop(clone);
        let deadline = tokio::time::Instant::now() + WAIT;
        while registry.upgrade().is_some() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.upgrade().is_none(), "hub tasks still hold the registry");
        assert_eq!(Arc::strong_count(&member), 1);
    }

    #[test]
    fn invalid_config_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let result = Hub::new(&HubConfig {
            shard_capacity: 0,
            ..HubConfig::default()
        });
        assert_matches!(result, Err(ConfigError::Zero("shard_capacity")));
    }
}
