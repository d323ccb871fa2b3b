//! Server-side presence fabric (§4.7, §4.8 step 3). A per-doc presence map
//! lives in memory for the lifetime of the process; patches are merged with
//! tombstone semantics and the sender's key is always replaced by its own
//! `socketId` before merging (the server, unlike clients, is the one place
//! that writes a socket's own entry). Grounded on
//! `cloudillo_rtdb::merge::shallow_merge`'s null-deletes-key rule, reused
//! here via [`docsync_types::model::merge_presence_patch`].

use crate::session::SocketId;
use docsync_types::ids::DocId;
use docsync_types::model::{PresenceMap, merge_presence_patch};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

static PRESENCE: LazyLock<RwLock<HashMap<DocId, PresenceMap>>> =
	LazyLock::new(|| RwLock::new(HashMap::new()));

/// Apply `patch` under `sender`'s own socket id to the doc's presence map and
/// return the re-keyed *delta* that was just merged (not the full map): a
/// single `sender.0 -> value` entry, with `value` left as `Value::Null` when
/// the patch was a tombstone. Broadcasting this delta (rather than the full
/// map) is what lets receivers' own additive+tombstone merge
/// (`merge_presence_patch`) actually delete a cleared key instead of merely
/// never seeing it re-added, and keeps a receiver from ever merging its own
/// socket id back into its own cache (I6).
pub fn apply_patch(
	doc_id: &DocId,
	sender: &SocketId,
	patch: HashMap<Box<str>, Value>,
) -> PresenceMap {
	let mut table = PRESENCE.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	let map = table.entry(doc_id.clone()).or_default();

	// A client patch carries one logical value under whatever key it chose
	// locally; the server always rewrites it to the sender's real socket id.
	let value = patch.into_values().next().unwrap_or(Value::Null);
	let mut delta = PresenceMap::with_capacity(1);
	delta.insert(sender.0.clone(), value);

	merge_presence_patch(map, &delta);
	delta
}

/// Snapshot of the current presence map for a joining socket.
pub fn snapshot(doc_id: &DocId) -> PresenceMap {
	let table = PRESENCE.read().unwrap_or_else(std::sync::PoisonError::into_inner);
	table.get(doc_id).cloned().unwrap_or_default()
}

/// Remove a disconnecting socket's entry from a doc's presence map so peers
/// see it vanish (the socket itself will never send a tombstone for itself).
pub fn remove_socket(doc_id: &DocId, socket: &SocketId) {
	let mut table = PRESENCE.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	if let Some(map) = table.get_mut(doc_id) {
		map.remove(&socket.0);
		if map.is_empty() {
			table.remove(doc_id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn patch_is_keyed_by_sender_socket_id_not_client_supplied_key() {
		let doc_id = DocId::from("doc-presence-unit-test-aaaa");
		let sender = SocketId("socket-a".into());
		let mut patch = HashMap::new();
		patch.insert("ignored".into(), json!({"cursor": 5}));

		let delta = apply_patch(&doc_id, &sender, patch);
		assert_eq!(delta.get("socket-a"), Some(&json!({"cursor": 5})));
		assert!(delta.get("ignored").is_none());
		assert_eq!(snapshot(&doc_id).get("socket-a"), Some(&json!({"cursor": 5})));
	}

	#[test]
	fn null_patch_value_removes_the_sender_entry_and_the_returned_delta_carries_the_tombstone() {
		let doc_id = DocId::from("doc-presence-unit-test-bbbb");
		let sender = SocketId("socket-b".into());
		let mut set_patch = HashMap::new();
		set_patch.insert("x".into(), json!({"cursor": 1}));
		apply_patch(&doc_id, &sender, set_patch);
		assert_eq!(snapshot(&doc_id).get("socket-b"), Some(&json!({"cursor": 1})));

		let mut clear_patch = HashMap::new();
		clear_patch.insert("x".into(), Value::Null);
		let delta = apply_patch(&doc_id, &sender, clear_patch);

		// The broadcast delta must preserve the tombstone so receivers' own
		// merge (not this process's map) deletes the key on their end too.
		assert_eq!(delta.get("socket-b"), Some(&Value::Null));
		assert!(snapshot(&doc_id).get("socket-b").is_none());
	}
}

// vim: ts=4
