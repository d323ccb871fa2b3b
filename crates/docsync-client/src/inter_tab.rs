//! Inter-tab fabric (§4.6): same-origin, same-user fan-out of applied
//! operations and presence patches between client instances sharing one
//! `ClientStorage` (e.g. two browser tabs, or two in-process `Client`s built
//! against the same embedded database). Grounded on the teacher's
//! `CRDT_ROOMS`-style process-global `LazyLock<RwLock<HashMap<...>>>`
//! broadcast registry (`server/src/crdt/websocket.rs`), generalized from a
//! per-document server room keyed by `docId` to a per-user bus keyed by
//! `userId`.

use crate::prelude::*;
use docsync_types::model::OperationPayload;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};
use tokio::sync::broadcast;

/// A presence delta as carried between tabs; same tombstone-by-null shape as
/// the wire `presence_patch` (§4.7).
pub type PresencePatch = HashMap<Box<str>, Value>;

/// Fan-out envelope for the same-origin bus (§4.6). `origin` is the
/// publishing `Client`'s process-local instance id, carried so a publisher
/// never re-applies its own broadcast.
#[derive(Clone, Debug)]
pub enum TabMessage {
	Operations { doc_id: DocId, operations: Vec<OperationPayload>, origin: u64 },
	Presence { doc_id: DocId, presence: PresencePatch, origin: u64 },
}

impl TabMessage {
	pub fn origin(&self) -> u64 {
		match self {
			TabMessage::Operations { origin, .. } | TabMessage::Presence { origin, .. } => *origin,
		}
	}

	pub fn doc_id(&self) -> &DocId {
		match self {
			TabMessage::Operations { doc_id, .. } | TabMessage::Presence { doc_id, .. } => doc_id,
		}
	}
}

const CHANNEL_CAPACITY: usize = 256;

type BusRegistry = HashMap<Box<str>, Arc<broadcast::Sender<TabMessage>>>;
static BUSES: LazyLock<RwLock<BusRegistry>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Join (creating if absent) the same-origin bus for `user_id`. Every tab
/// belonging to the same user shares this sender within the process; nothing
/// here crosses a process boundary — true cross-tab delivery in a browser
/// relies on the embedding host bridging this bus to `BroadcastChannel` or
/// equivalent.
pub fn join(user_id: &str) -> Arc<broadcast::Sender<TabMessage>> {
	let mut buses = BUSES.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	buses.entry(user_id.into()).or_insert_with(|| Arc::new(broadcast::channel(CHANNEL_CAPACITY).0)).clone()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn same_user_id_shares_one_bus() {
		let a = join("user-a");
		let b = join("user-a");
		let mut rx = b.subscribe();

		let _ = a.send(TabMessage::Operations {
			doc_id: DocId("doc1".into()),
			operations: vec![],
			origin: 1,
		});

		let received = rx.recv().await.unwrap();
		assert_eq!(received.origin(), 1);
	}

	#[tokio::test]
	async fn different_user_ids_do_not_share_a_bus() {
		let a = join("user-b");
		let c = join("user-c");
		assert!(!Arc::ptr_eq(&a, &c));
	}
}

// vim: ts=4
