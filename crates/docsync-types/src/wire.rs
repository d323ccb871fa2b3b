//! Wire protocol (§4.3, §6.1): one duplex channel per client, three message
//! classes — correlated request/response, server-initiated events, and
//! connection lifecycle. Grounded on the teacher's `crdt/websocket.rs` tagged
//! `CrdtMessage` enum (`#[serde(tag = "cmd")]`) and its request/response
//! correlation via a client-supplied id.

use crate::ids::{Clock, DocId};
use crate::model::{OperationPayload, PresenceMap, SnapshotPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Clients MUST time out an outstanding request after this long (§4.3, B3).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Server squash runs once the server-returned backlog reaches this many
/// batches (§4.8 step 6, §9).
pub const SQUASH_THRESHOLD: usize = 100;

/// A client → server request, tagged by `cmd` to mirror the teacher's wire
/// shape. Every request carries a correlation `id` the response echoes back.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ClientRequest {
	Sync {
		id: u64,
		doc_id: DocId,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		operations: Vec<OperationPayload>,
		clock: Clock,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		presence: Option<serde_json::Value>,
	},
	Presence {
		id: u64,
		doc_id: DocId,
		presence_patch: HashMap<Box<str>, serde_json::Value>,
	},
	DeleteDoc {
		id: u64,
		doc_id: DocId,
	},
	UnsubscribeDoc {
		id: u64,
		doc_id: DocId,
	},
}

impl ClientRequest {
	pub fn id(&self) -> u64 {
		match self {
			ClientRequest::Sync { id, .. }
			| ClientRequest::Presence { id, .. }
			| ClientRequest::DeleteDoc { id, .. }
			| ClientRequest::UnsubscribeDoc { id, .. } => *id,
		}
	}

	pub fn doc_id(&self) -> &DocId {
		match self {
			ClientRequest::Sync { doc_id, .. }
			| ClientRequest::Presence { doc_id, .. }
			| ClientRequest::DeleteDoc { doc_id, .. }
			| ClientRequest::UnsubscribeDoc { doc_id, .. } => doc_id,
		}
	}
}

/// The wire error taxonomy (§4.3, §7). Only these three kinds are returned
/// over the wire by the server; `NetworkError` and `AuthenticationError` are
/// connection-level, never part of a response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WireErrorKind {
	AuthorizationError,
	DatabaseError,
	ValidationError,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireError {
	#[serde(rename = "type")]
	pub kind: WireErrorKind,
	pub message: String,
}

/// A `sync` response's success payload. Fields are omitted when empty per
/// §4.8 step 4d.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncResult {
	pub doc_id: DocId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub operations: Option<Vec<OperationPayload>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub serialized_doc: Option<SnapshotPayload>,
	pub clock: Clock,
}

/// The success/error union for a `sync` response, matching §4.3's
/// Result-shaped response: tried as `SyncResult` first, falling back to
/// `WireError`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncOutcome {
	Success(SyncResult),
	Error(WireError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
	Success,
	Error(WireError),
}

/// The correlated response body for any `ClientRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ServerResponse {
	Sync { id: u64, outcome: SyncOutcome },
	Presence { id: u64, outcome: Outcome },
	DeleteDoc { id: u64, outcome: Outcome },
	UnsubscribeDoc { id: u64, outcome: Outcome },
}

impl ServerResponse {
	pub fn id(&self) -> u64 {
		match self {
			ServerResponse::Sync { id, .. }
			| ServerResponse::Presence { id, .. }
			| ServerResponse::DeleteDoc { id, .. }
			| ServerResponse::UnsubscribeDoc { id, .. } => *id,
		}
	}
}

impl From<WireError> for Outcome {
	fn from(err: WireError) -> Self {
		Outcome::Error(err)
	}
}

/// A server → client event; no response is expected or possible (§4.3 class 2).
/// Named `PushEvent` to distinguish from the operator-facing
/// [`crate::events::ServerEvent`] taxonomy (§4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PushEvent {
	/// "There are server operations on `docId` you may not have yet" (§4.3).
	Dirty { doc_id: DocId },
	/// A room member's presence patch, already tombstone-merged server-side.
	Presence {
		doc_id: DocId,
		presence_patch: HashMap<Box<str>, serde_json::Value>,
	},
	/// Sent immediately to a socket on first join to a doc room (§4.7).
	PresenceSnapshot { doc_id: DocId, presence: PresenceMap },
}

/// Connection lifecycle, distinct from the framed message classes above.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
	Open,
	Close { reason: String },
	Error { message: String },
}

impl ConnectionEvent {
	/// Whether a close reason is a non-retriable credential rejection (§4.3:
	/// "clients treat any such prefix as a non-retriable credential error").
	pub fn is_authentication_reason(reason: &str) -> bool {
		reason.starts_with("Authentication")
	}
}

// vim: ts=4
