//! `Switchboard`: callbacks plus configuration, and the driver that turns
//! an accepted transport into a running session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge, histogram};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::errors::{ConfigError, HubError};
use crate::handler::EventHandler;
use crate::hub::Hub;
use crate::session::Session;
use crate::telemetry;
use crate::transport::{Transport, TransportReader};

/// Entry point shared by every listener.
///
/// Holds the application's [`EventHandler`], the session configuration and,
/// optionally, a [`Hub`] that sessions join for their lifetime.
pub struct Switchboard {
    config: SessionConfig,
    handler: Arc<dyn EventHandler>,
    hub: Option<Hub>,
    active: AtomicUsize,
}

impl Switchboard {
    /// Create a switchboard after validating `config`.
    pub fn new(config: SessionConfig, handler: Arc<dyn EventHandler>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            handler,
            hub: None,
            active: AtomicUsize::new(0),
        })
    }

    /// Register every session with `hub` on accept and remove it on teardown.
    #[must_use]
    pub fn with_hub(mut self, hub: Hub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attached hub, if any.
    pub fn hub(&self) -> Option<&Hub> {
        self.hub.as_ref()
    }

    /// Sessions currently being driven.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Whether new sessions are accepted: always, unless the attached hub
    /// has shut down.
    pub fn is_accepting(&self) -> bool {
        self.hub.as_ref().is_none_or(|hub| !hub.is_closed())
    }

    /// Drive `transport` until the session ends.
    ///
    /// 1. Create the session and fire `on_connect`
    /// 2. Spawn the output loop; run the input loop on this task
    /// 3. Tear down, wait for the output loop, fire `on_disconnect` once
    ///
    /// Returns [`HubError::Closed`] without running the session if the
    /// attached hub has shut down. Every other failure is reported through
    /// the handler's `on_error`.
    #[instrument(skip_all, fields(peer = ?transport.peer_addr()))]
    pub async fn handle<T: Transport>(
        &self,
        transport: T,
        attributes: HashMap<String, Value>,
    ) -> Result<(), HubError> {
        if !self.is_accepting() {
            return Err(HubError::Closed);
        }

        let peer = transport.peer_addr();
        let (reader, writer) = transport.split();
        let (session, control) = Session::new(
            self.config.clone(),
            Arc::clone(&self.handler),
            attributes,
            peer,
            reader.replies_to_control(),
        );

        if let Some(hub) = &self.hub {
            let _ = hub.register(Arc::clone(&session)).await?;
        }

        let started = std::time::Instant::now();
        let _ = self.active.fetch_add(1, Ordering::Relaxed);
        counter!(telemetry::SESSIONS_TOTAL).increment(1);
        gauge!(telemetry::SESSIONS_ACTIVE).increment(1.0);
        info!(session_id = %session.id(), "session opened");

        self.handler.on_connect(&session).await;

        let output = tokio::spawn(Arc::clone(&session).run_output(writer, control));
        session.run_input(reader).await;
        let _ = session.begin_teardown();
        if let Err(e) = output.await {
            warn!(session_id = %session.id(), error = %e, "output loop failed");
        }

        if let Some(hub) = &self.hub
            && let Err(e) = hub.unregister(&session).await
        {
            debug!(session_id = %session.id(), error = %e, "hub already closed");
        }
        session.mark_closed();
        self.handler.on_disconnect(&session).await;

        let _ = self.active.fetch_sub(1, Ordering::Relaxed);
        gauge!(telemetry::SESSIONS_ACTIVE).decrement(1.0);
        histogram!(telemetry::SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(session_id = %session.id(), "session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switchboard")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("active", &self.active_sessions())
            .finish_non_exhaustive()
    }
}
