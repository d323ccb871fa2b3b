//! Server session and room model (§4.9). Every connection carries
//! `{ userId, deviceId, context }` after handshake authentication. Rooms are
//! per-document (`doc:{docId}`); membership is tracked so that on disconnect
//! all memberships are released. Grounded on the teacher's `CRDT_DOCS`
//! broadcast registry (`crdt/websocket.rs`) generalized from one fixed
//! awareness-channel type to the engine's `RoomMessage` envelope, and on
//! `core/ws_bus.rs`'s per-user registration/cleanup shape.

use crate::prelude::*;
use docsync_types::wire::PushEvent;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, RwLock};
use tokio::sync::broadcast;

const SOCKET_ID_ALPHABET: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
	'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
	'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
	'V', 'W', 'X', 'Y', 'Z',
];
const SOCKET_ID_LENGTH: usize = 24;

/// A per-connection identifier, generated server-side at handshake. Used as
/// the presence map key (§3 "Presence map": `docId → socketId → opaque`).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SocketId(pub Box<str>);

impl SocketId {
	pub fn generate() -> Self {
		let mut rng = rand::rng();
		let mut id = String::with_capacity(SOCKET_ID_LENGTH);
		for _ in 0..SOCKET_ID_LENGTH {
			id.push(SOCKET_ID_ALPHABET[rng.random_range(0..SOCKET_ID_ALPHABET.len())]);
		}
		Self(id.into())
	}
}

impl std::fmt::Display for SocketId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Per-connection context established at handshake (§4.9).
#[derive(Clone, Debug)]
pub struct ConnectionContext {
	pub socket_id: SocketId,
	pub user_id: Box<str>,
	pub device_id: DeviceId,
}

/// One message delivered on a doc room's broadcast channel. Receivers filter
/// out their own socket (always) and, for `dirty`, same-device siblings too
/// (§4.8 step 5: "same-device siblings are not notified; they learn via the
/// inter-tab fabric").
#[derive(Clone, Debug)]
pub struct RoomMessage {
	pub from_socket: SocketId,
	pub from_device: DeviceId,
	pub event: PushEvent,
}

type RoomRegistryMap = HashMap<DocId, Arc<broadcast::Sender<RoomMessage>>>;

/// `doc:{docId}` rooms, keyed by `docId`. Grounded on `CRDT_DOCS`.
static ROOMS: LazyLock<RwLock<RoomRegistryMap>> = LazyLock::new(|| RwLock::new(HashMap::new()));

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// Join (creating if absent) the broadcast channel for `doc:{docId}`.
pub fn join_room(doc_id: &DocId) -> Arc<broadcast::Sender<RoomMessage>> {
	let mut rooms = ROOMS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	rooms
		.entry(doc_id.clone())
		.or_insert_with(|| Arc::new(broadcast::channel(ROOM_CHANNEL_CAPACITY).0))
		.clone()
}

/// Drop a room's channel once its last subscriber has gone.
pub fn prune_room_if_empty(doc_id: &DocId) {
	let mut rooms = ROOMS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
	if let Some(tx) = rooms.get(doc_id) {
		if tx.receiver_count() == 0 {
			rooms.remove(doc_id);
		}
	}
}

/// Per-process map `socketId → {docId}` for cleanup on disconnect (§4.9).
#[derive(Default)]
pub struct SocketMemberships {
	inner: RwLock<HashMap<SocketId, HashSet<DocId>>>,
}

impl SocketMemberships {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(&self, socket_id: &SocketId, doc_id: &DocId) {
		let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		inner.entry(socket_id.clone()).or_default().insert(doc_id.clone());
	}

	pub fn forget(&self, socket_id: &SocketId, doc_id: &DocId) {
		let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(docs) = inner.get_mut(socket_id) {
			docs.remove(doc_id);
			if docs.is_empty() {
				inner.remove(socket_id);
			}
		}
	}

	/// Called on disconnect: every `docId` this socket had joined, so the
	/// caller can leave each room and prune it.
	pub fn take_all(&self, socket_id: &SocketId) -> HashSet<DocId> {
		let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		inner.remove(socket_id).unwrap_or_default()
	}
}

// vim: ts=4
