//! The client half of the docsync local-first synchronization engine: a
//! ref-counted document cache (§4.4), the per-document push/pull state
//! machine (§4.5, "the hardest part"), the inter-tab fabric (§4.6), and the
//! presence fabric's client side (§4.7).
//!
//! The engine is generic over a single [`docsync_types::doc_binding::DocBinding`]
//! implementation, a [`docsync_types::storage::ClientStorage`] provider, and a
//! [`transport::Transport`] — it never looks inside any of the three.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod client;
pub mod device;
pub mod inter_tab;
pub mod presence;
pub mod prelude;
pub mod sync_engine;
pub mod transport;

pub use client::{Client, SubscribeArgs};

// vim: ts=4
