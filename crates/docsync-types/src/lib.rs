//! Shared types, the `DocBinding` contract, the storage provider contract,
//! and the wire protocol for the docsync local-first synchronization engine.
//!
//! This crate has no opinion on transport, storage backend, or CRDT — it
//! only defines the shapes the client and server engines (in
//! `docsync-client` and `docsync-server`) agree on.

pub mod doc_binding;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod prelude;
pub mod storage;
pub mod wire;

pub use error::{ClResult, Error};

// vim: ts=4
