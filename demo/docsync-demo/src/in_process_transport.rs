//! An in-process [`Transport`] wiring a client directly into a
//! [`docsync_server`] instance running in the same process, without a real
//! socket. Grounded on `docsync_server::websocket`'s
//! `handle_connection`/`dispatch_request`/`ensure_joined` trio: this replays
//! the same session/room/sync_handler calls that crate makes per WebSocket
//! frame, just replacing the outbound `axum::extract::ws::Message` sink with
//! a local broadcast channel the demo's [`Transport::events`] reads from.
//!
//! This is demo-only plumbing: a real deployment always crosses a process
//! boundary between client and server, so it always goes through
//! `docsync_server::websocket` and `docsync_client::transport::ws`.

use async_trait::async_trait;
use docsync_client::transport::Transport;
use docsync_server::app::App;
use docsync_server::session::{self, ConnectionContext, RoomMessage, SocketId};
use docsync_server::{presence, sync_handler};
use docsync_types::doc_binding::DocBinding;
use docsync_types::error::ClResult;
use docsync_types::ids::{DeviceId, DocId};
use docsync_types::storage::TxMode;
use docsync_types::wire::{
	ClientRequest, ConnectionEvent, Outcome, PushEvent, ServerResponse, SyncOutcome, WireError,
	WireErrorKind,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub struct InProcessTransport<B: DocBinding> {
	app: App<B>,
	ctx: ConnectionContext,
	events_tx: broadcast::Sender<PushEvent>,
	lifecycle_tx: broadcast::Sender<ConnectionEvent>,
	room_tasks: AsyncMutex<HashMap<DocId, JoinHandle<()>>>,
}

impl<B> InProcessTransport<B>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	pub fn connect(app: App<B>, user_id: &str, device_id: DeviceId) -> Arc<Self> {
		let ctx = ConnectionContext { socket_id: SocketId::generate(), user_id: user_id.into(), device_id };
		let (events_tx, _) = broadcast::channel(256);
		let (lifecycle_tx, _) = broadcast::channel(16);
		let _ = lifecycle_tx.send(ConnectionEvent::Open);
		Arc::new(Self { app, ctx, events_tx, lifecycle_tx, room_tasks: AsyncMutex::new(HashMap::new()) })
	}

	/// Mirrors `websocket::ensure_joined`: join the doc's room once, spawning
	/// a forwarding task that filters out this socket's own messages and
	/// same-device `dirty` hints (those travel over the inter-tab fabric
	/// instead, §4.8 step 5).
	async fn ensure_joined(&self, doc_id: &DocId) {
		let mut tasks = self.room_tasks.lock().await;
		if tasks.contains_key(doc_id) {
			return;
		}
		let room_tx = session::join_room(doc_id);
		self.app.memberships.record(&self.ctx.socket_id, doc_id);

		let mut room_rx = room_tx.subscribe();
		let my_socket = self.ctx.socket_id.clone();
		let my_device = self.ctx.device_id.clone();
		let forward_tx = self.events_tx.clone();
		let handle = tokio::spawn(async move {
			loop {
				match room_rx.recv().await {
					Ok(RoomMessage { from_socket, from_device, event }) => {
						if from_socket == my_socket {
							continue;
						}
						if matches!(event, PushEvent::Dirty { .. }) && from_device == my_device {
							continue;
						}
						if forward_tx.send(event).is_err() {
							return;
						}
					}
					Err(RecvError::Lagged(_)) => continue,
					Err(RecvError::Closed) => return,
				}
			}
		});
		tasks.insert(doc_id.clone(), handle);

		let snapshot = presence::snapshot(doc_id);
		if !snapshot.is_empty() {
			let _ = self.events_tx.send(PushEvent::PresenceSnapshot { doc_id: doc_id.clone(), presence: snapshot });
		}
	}

	async fn leave(&self, doc_id: &DocId) {
		let mut tasks = self.room_tasks.lock().await;
		if let Some(handle) = tasks.remove(doc_id) {
			handle.abort();
		}
		self.app.memberships.forget(&self.ctx.socket_id, doc_id);
		presence::remove_socket(doc_id, &self.ctx.socket_id);
		session::prune_room_if_empty(doc_id);
	}

	async fn delete_doc(&self, doc_id: &DocId) -> Outcome {
		match self.app.storage.transaction(TxMode::ReadWrite).await {
			Ok(mut tx) => {
				if let Err(err) = tx.delete_doc(doc_id).await {
					return Outcome::Error(WireError { kind: WireErrorKind::DatabaseError, message: err.to_string() });
				}
				if let Err(err) = tx.commit().await {
					return Outcome::Error(WireError { kind: WireErrorKind::DatabaseError, message: err.to_string() });
				}
				Outcome::Success
			}
			Err(err) => Outcome::Error(WireError { kind: WireErrorKind::DatabaseError, message: err.to_string() }),
		}
	}
}

#[async_trait]
impl<B> Transport for InProcessTransport<B>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	async fn request(&self, request: ClientRequest) -> ClResult<ServerResponse> {
		let response = match request {
			ClientRequest::Sync { id, doc_id, operations, clock, presence } => {
				self.ensure_joined(&doc_id).await;
				let room_tx = session::join_room(&doc_id);
				let presence_patch = presence.and_then(|v| serde_json::from_value(v).ok());
				let result = sync_handler::handle_sync(
					&self.app,
					&self.ctx,
					&room_tx,
					&self.app.doc_type,
					doc_id,
					operations,
					clock,
					presence_patch,
				)
				.await;
				let outcome = match result {
					Ok(res) => SyncOutcome::Success(res),
					Err(err) => SyncOutcome::Error(WireError { kind: wire_error_kind(&err), message: err.to_string() }),
				};
				ServerResponse::Sync { id, outcome }
			}
			ClientRequest::Presence { id, doc_id, presence_patch } => {
				self.ensure_joined(&doc_id).await;
				let room_tx = session::join_room(&doc_id);
				let merged = presence::apply_patch(&doc_id, &self.ctx.socket_id, presence_patch);
				let _ = room_tx.send(RoomMessage {
					from_socket: self.ctx.socket_id.clone(),
					from_device: self.ctx.device_id.clone(),
					event: PushEvent::Presence { doc_id: doc_id.clone(), presence_patch: merged.into_iter().collect() },
				});
				ServerResponse::Presence { id, outcome: Outcome::Success }
			}
			ClientRequest::DeleteDoc { id, doc_id } => {
				ServerResponse::DeleteDoc { id, outcome: self.delete_doc(&doc_id).await }
			}
			ClientRequest::UnsubscribeDoc { id, doc_id } => {
				self.leave(&doc_id).await;
				ServerResponse::UnsubscribeDoc { id, outcome: Outcome::Success }
			}
		};
		Ok(response)
	}

	fn events(&self) -> broadcast::Receiver<PushEvent> {
		self.events_tx.subscribe()
	}

	fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.lifecycle_tx.subscribe()
	}
}

fn wire_error_kind(err: &docsync_types::error::Error) -> WireErrorKind {
	match err {
		docsync_types::error::Error::AuthorizationError(_) => WireErrorKind::AuthorizationError,
		docsync_types::error::Error::ValidationError(_) => WireErrorKind::ValidationError,
		_ => WireErrorKind::DatabaseError,
	}
}

// vim: ts=4
