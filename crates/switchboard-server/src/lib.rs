//! # switchboard-server
//!
//! HTTP and raw TCP front ends for `switchboard-core`.
//!
//! - `GET <wsPath>` upgrades to a web-socket and runs a session
//! - `GET /health` reports session counts and uptime
//! - `GET /metrics` renders Prometheus text (when a recorder is attached)
//! - an optional raw TCP listener speaks the length-prefixed stream format
//!
//! Every session joins the server's hub; shutdown closes the hub (each
//! client receives a going-away close frame) and then stops the listeners.

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod tcp;
pub mod upgrade;
pub mod websocket;

pub use errors::ServerError;
pub use server::{AppState, SwitchboardServer, run};
pub use shutdown::ShutdownCoordinator;
pub use tcp::serve_tcp;
pub use upgrade::request_attributes;
pub use websocket::WebSocketTransport;
