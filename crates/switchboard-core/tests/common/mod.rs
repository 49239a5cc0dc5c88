//! Shared harness: a handler that reports every callback on a channel, and a
//! helper that drives a session over an in-memory duplex stream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use switchboard_core::frame::FrameCodec;
use switchboard_core::{
    EventHandler, HubError, Message, Session, SessionError, StreamTransport, Switchboard,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type Client = Framed<DuplexStream, FrameCodec>;

/// One recorded callback.
#[derive(Debug)]
pub enum Event {
    Connect(Arc<Session>),
    Disconnect(Arc<Session>),
    Message(Bytes),
    MessageBinary(Bytes),
    Sent(Bytes),
    SentBinary(Bytes),
    Error(String),
    Pong,
    Close(Option<u16>, String),
}

/// What the handler does with inbound text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Nothing,
    Echo,
    /// Echo text and fail every peer close.
    RejectClose,
}

pub struct ChannelHandler {
    events: mpsc::UnboundedSender<Event>,
    reply: Reply,
}

impl ChannelHandler {
    pub fn new(reply: Reply) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events, reply }), rx)
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn on_connect(&self, session: &Arc<Session>) {
        self.emit(Event::Connect(Arc::clone(session)));
    }

    async fn on_disconnect(&self, session: &Arc<Session>) {
        self.emit(Event::Disconnect(Arc::clone(session)));
    }

    async fn on_message(&self, session: &Arc<Session>, payload: Bytes) {
        if payload.as_ref() == b"quit" {
            let _ = session.close_with_payload(1000, "done");
        } else if self.reply != Reply::Nothing {
            let _ = session.write(payload.clone());
        }
        self.emit(Event::Message(payload));
    }

    async fn on_message_binary(&self, session: &Arc<Session>, payload: Bytes) {
        if self.reply == Reply::Echo {
            let _ = session.write_binary(payload.clone());
        }
        self.emit(Event::MessageBinary(payload));
    }

    async fn on_sent(&self, _session: &Arc<Session>, payload: Bytes) {
        self.emit(Event::Sent(payload));
    }

    async fn on_sent_binary(&self, _session: &Arc<Session>, payload: Bytes) {
        self.emit(Event::SentBinary(payload));
    }

    async fn on_error(&self, _session: &Arc<Session>, error: &SessionError) {
        self.emit(Event::Error(error.to_string()));
    }

    async fn on_pong(&self, _session: &Arc<Session>) {
        self.emit(Event::Pong);
    }

    async fn on_close(
        &self,
        session: &Arc<Session>,
        code: Option<u16>,
        reason: &str,
    ) -> Result<(), SessionError> {
        self.emit(Event::Close(code, reason.to_owned()));
        if self.reply == Reply::RejectClose {
            return Err(SessionError::Handler(format!("refusing close {code:?}")));
        }
        session.echo_close(code, reason)
    }
}

/// Start a session over a duplex pipe and return the client end.
pub fn connect(
    switchboard: &Arc<Switchboard>,
    attributes: HashMap<String, Value>,
) -> (Client, JoinHandle<Result<(), HubError>>) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let switchboard = Arc::clone(switchboard);
    let handle = tokio::spawn(async move {
        switchboard
            .handle(StreamTransport::new(server), attributes)
            .await
    });
    (Framed::new(client, FrameCodec::new()), handle)
}

/// Next frame from the session, failing the test on timeout or error.
pub async fn recv(client: &mut Client) -> Message {
    tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("frame decode failed")
}

/// Next event, failing the test on timeout.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until `pick` matches one.
pub async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<Event>,
    mut pick: impl FnMut(Event) -> Option<T>,
) -> T {
    loop {
        if let Some(found) = pick(next_event(events).await) {
            return found;
        }
    }
}

/// Wait for the connect event and return the session.
pub async fn connected(events: &mut mpsc::UnboundedReceiver<Event>) -> Arc<Session> {
    wait_for(events, |e| match e {
        Event::Connect(session) => Some(session),
        _ => None,
    })
    .await
}
