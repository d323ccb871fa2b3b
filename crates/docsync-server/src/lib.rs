//! Authoritative sync server (§4.8, §4.9): per-doc clock assignment, operation
//! log append, room fan-out, presence, and session bookkeeping. The transport
//! is a single duplex WebSocket channel per client (§4.3); `websocket` wires
//! axum's upgrade handshake to the [`sync_handler`] and [`presence`] logic.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod prelude;
pub mod presence;
pub mod session;
pub mod sync_handler;
pub mod websocket;

pub use app::{App, AppBuilder, AppState, AuthContext, AuthorizeRequest};

// vim: ts=4
