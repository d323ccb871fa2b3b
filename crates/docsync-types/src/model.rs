//! Document model: operations, operation-log batches, serialized snapshots, and
//! the presence map. The engine treats `Operation` and `Snapshot` payloads as
//! opaque JSON values — their shape is entirely owned by the `DocBinding` (§3, §4.2).

use crate::ids::{Clock, DocId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An opaque operation payload produced by a `DocBinding`. The sync engine never
/// interprets the contents; it only requires that replaying a sequence of these
/// in order, against replicas that started identical, converges (§3).
pub type OperationPayload = Value;

/// An opaque serialized-document payload produced by `DocBinding::serialize`.
pub type SnapshotPayload = Value;

/// One batch of operations submitted together in a single `sync` request, or
/// persisted together in a single local writeback transaction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperationBatch {
	pub operations: Vec<OperationPayload>,
}

impl OperationBatch {
	pub fn new(operations: Vec<OperationPayload>) -> Self {
		Self { operations }
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}
}

/// `(docId, opaqueOperationPayload, clock)` — one row in the server-side
/// operation log (§3). The client stores batches without a per-operation clock;
/// the server assigns one clock per appended batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationLogEntry {
	pub doc_id: DocId,
	pub batch: OperationBatch,
	pub clock: Clock,
}

/// `(docId, opaqueSnapshotPayload, clock)` — exactly one row per `docId` (§3).
/// `clock` equals the clock of the last operation folded into the snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedDoc {
	pub doc_id: DocId,
	pub snapshot: SnapshotPayload,
	pub clock: Clock,
}

/// `docId → (socketId → opaquePresenceValue)` (§3, §4.7). A missing/null value in
/// an incoming patch deletes the key; the sender's own identifier is excluded
/// when merging into the local cache (I6).
pub type PresenceMap = HashMap<Box<str>, Value>;

/// A presence patch: keys present with `Value::Null` delete; all other values
/// overwrite. Mirrors the tombstone-merge semantics used for the presence fabric.
pub fn merge_presence_patch(target: &mut PresenceMap, patch: &HashMap<Box<str>, Value>) {
	for (key, value) in patch {
		if value.is_null() {
			target.remove(key);
		} else {
			target.insert(key.clone(), value.clone());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn presence_patch_tombstones_null_keys() {
		let mut target: PresenceMap = HashMap::new();
		target.insert("a".into(), json!({"cursor": 10}));

		let mut patch = HashMap::new();
		patch.insert("a".into(), Value::Null);
		merge_presence_patch(&mut target, &patch);

		assert!(target.is_empty());
	}

	#[test]
	fn presence_patch_overwrites_non_null_keys() {
		let mut target: PresenceMap = HashMap::new();
		let mut patch = HashMap::new();
		patch.insert("b".into(), json!({"cursor": 3}));
		merge_presence_patch(&mut target, &patch);
		assert_eq!(target.get("b"), Some(&json!({"cursor": 3})));
	}
}

// vim: ts=4
