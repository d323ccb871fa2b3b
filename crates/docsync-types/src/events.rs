//! Event taxonomy (§4.10, §9 "replace callbacks with a channel/stream
//! abstraction"). Each kind is a tagged variant broadcast on a
//! `tokio::sync::broadcast` channel rather than delivered via callback
//! registration, per the Design Note — grounded on the teacher's `ws_bus.rs`
//! broadcast-channel event bus.

use crate::ids::{Clock, DocId};
use crate::wire::{ClientRequest, SyncOutcome};
use std::time::Duration;

/// Where a `change` event's operations came from (§4.10).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeOrigin {
	Local,
	Broadcast,
	Remote,
}

/// Where a `docLoad` resolved its document from (§4.4, §4.10).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadSource {
	Cache,
	Local,
	Created,
}

/// The six client-observable lifecycle events (§4.10).
#[derive(Clone, Debug)]
pub enum ClientEvent {
	Connect,
	Disconnect { reason: String },
	Change { doc_id: DocId, origin: ChangeOrigin },
	Sync { request: ClientRequest, outcome: SyncOutcome },
	DocLoad { doc_id: DocId, source: LoadSource },
	DocUnload { doc_id: DocId, ref_count: usize },
}

/// Operator-facing server events (§4.10). `SyncRequest` is a "wide event":
/// it carries enough context for a single log line to answer "what happened
/// on this request" without joining against other telemetry.
#[derive(Clone, Debug)]
pub enum ServerEvent {
	ClientConnect { user_id: Box<str>, device_id: Box<str> },
	ClientDisconnect { user_id: Box<str>, device_id: Box<str>, reason: String },
	SyncRequest {
		doc_id: DocId,
		clock: Clock,
		duration: Duration,
		devices_count: usize,
		clients_count: usize,
		error: Option<String>,
	},
}

// vim: ts=4
