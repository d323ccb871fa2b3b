//! WebSocket transport (§4.3, §6.1): axum upgrade handshake binding one
//! duplex channel per client to the sync handler, presence fabric, and
//! per-doc room fan-out. Grounded on the teacher's `core/websocket.rs`
//! upgrade-handler-per-protocol shape and `crdt/websocket.rs`'s
//! split-sink-plus-broadcast-forwarding connection loop, generalized from a
//! fixed Yjs binary frame to the engine's tagged JSON request/response/event
//! messages.

use crate::app::App;
use crate::prelude::*;
use crate::session::{self, ConnectionContext, RoomMessage, SocketId};
use crate::sync_handler;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use docsync_types::doc_binding::DocBinding;
use docsync_types::events::ServerEvent;
use docsync_types::wire::{
	ClientRequest, Outcome, PushEvent, ServerResponse, SyncOutcome, WireError, WireErrorKind,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handshake query parameters (§4.3: "the channel carries an opaque token and
/// an opaque device identifier at handshake time").
#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
	pub token: String,
	#[serde(default)]
	pub device_id: Option<Box<str>>,
}

/// `GET /ws/docsync?token=..&device_id=..` — the spec's single duplex channel
/// per client (§4.3). Rejection closes with a reason beginning
/// `Authentication` per §4.3 and [`ConnectionEvent::is_authentication_reason`].
pub async fn get_ws_docsync<B>(
	ws: WebSocketUpgrade,
	Query(query): Query<HandshakeQuery>,
	State(app): State<App<B>>,
) -> Response
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	match (app.authenticate)(query.token).await {
		Some(auth) => {
			let device_id = query.device_id.map(DeviceId).unwrap_or_else(DeviceId::generate);
			ws.on_upgrade(move |socket| handle_connection(socket, app, auth.user_id, device_id))
		}
		None => {
			warn!("docsync websocket handshake rejected: invalid token");
			ws.on_upgrade(|socket| close_unauthenticated(socket))
		}
	}
}

/// The server's single route: `GET /ws/docsync` (§4.3 "one duplex channel per
/// client"). Callers mount this under `axum::Router::new().merge(router(state))`
/// or nest it at a path prefix of their choosing.
pub fn router<B>(app: App<B>) -> axum::Router
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	axum::Router::new().route("/ws/docsync", axum::routing::get(get_ws_docsync::<B>)).with_state(app)
}

async fn close_unauthenticated(mut socket: WebSocket) {
	let _ = socket
		.send(Message::Close(Some(CloseFrame {
			code: 4401,
			reason: "Authentication: invalid or expired token".into(),
		})))
		.await;
}

async fn handle_connection<B>(socket: WebSocket, app: App<B>, user_id: Box<str>, device_id: DeviceId)
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	let ctx = ConnectionContext { socket_id: SocketId::generate(), user_id, device_id };
	info!("docsync connect: user={} device={} socket={}", ctx.user_id, ctx.device_id, ctx.socket_id);
	let _ = app.events.send(ServerEvent::ClientConnect {
		user_id: ctx.user_id.clone(),
		device_id: Box::from(ctx.device_id.0.as_ref()),
	});

	let (mut ws_tx, mut ws_rx) = socket.split();
	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
	let mut room_tasks: HashMap<DocId, JoinHandle<()>> = HashMap::new();

	let close_reason = loop {
		tokio::select! {
			incoming = ws_rx.next() => {
				match incoming {
					Some(Ok(Message::Text(text))) => {
						match serde_json::from_str::<ClientRequest>(&text) {
							Ok(request) => {
								if let Err(reason) = dispatch_request(&app, &ctx, request, &out_tx, &mut room_tasks).await {
									break reason;
								}
							}
							Err(err) => warn!("docsync: malformed request from {}: {}", ctx.socket_id, err),
						}
					}
					Some(Ok(Message::Close(_))) | None => break "client closed".to_string(),
					Some(Ok(_)) => {} // binary/ping/pong carry no protocol meaning here
					Some(Err(err)) => break format!("transport error: {err}"),
				}
			}
			Some(out_msg) = out_rx.recv() => {
				if ws_tx.send(out_msg).await.is_err() {
					break "send failed".to_string();
				}
			}
		}
	};

	for (doc_id, handle) in room_tasks.drain() {
		handle.abort();
		session::prune_room_if_empty(&doc_id);
	}
	for doc_id in app.memberships.take_all(&ctx.socket_id) {
		crate::presence::remove_socket(&doc_id, &ctx.socket_id);
		session::prune_room_if_empty(&doc_id);
	}
	let _ = app.events.send(ServerEvent::ClientDisconnect {
		user_id: ctx.user_id.clone(),
		device_id: Box::from(ctx.device_id.0.as_ref()),
		reason: close_reason.clone(),
	});
	info!("docsync disconnect: socket={} ({})", ctx.socket_id, close_reason);
}

/// Ensure this connection has joined `doc:{doc_id}`'s room, spawning the
/// forwarding task on first join and sending the current presence snapshot
/// directly to the joining socket (§4.7: "sent immediately on first `sync`
/// for that doc").
fn ensure_joined<B>(
	app: &App<B>,
	ctx: &ConnectionContext,
	doc_id: &DocId,
	out_tx: &mpsc::UnboundedSender<Message>,
	room_tasks: &mut HashMap<DocId, JoinHandle<()>>,
) {
	if room_tasks.contains_key(doc_id) {
		return;
	}
	let room_tx = session::join_room(doc_id);
	app.memberships.record(&ctx.socket_id, doc_id);

	let mut room_rx = room_tx.subscribe();
	let my_socket = ctx.socket_id.clone();
	let my_device = ctx.device_id.clone();
	let forward_tx = out_tx.clone();
	let handle = tokio::spawn(async move {
		loop {
			match room_rx.recv().await {
				Ok(RoomMessage { from_socket, from_device, event }) => {
					if from_socket == my_socket {
						continue;
					}
					if matches!(event, PushEvent::Dirty { .. }) && from_device == my_device {
						// same-device siblings learn via the inter-tab fabric (§4.8 step 5)
						continue;
					}
					if let Ok(text) = serde_json::to_string(&event) {
						if forward_tx.send(Message::Text(text.into())).is_err() {
							return;
						}
					}
				}
				Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => return,
			}
		}
	});
	room_tasks.insert(doc_id.clone(), handle);

	let snapshot = crate::presence::snapshot(doc_id);
	if !snapshot.is_empty() {
		if let Ok(text) =
			serde_json::to_string(&PushEvent::PresenceSnapshot { doc_id: doc_id.clone(), presence: snapshot })
		{
			let _ = out_tx.send(Message::Text(text.into()));
		}
	}
}

async fn dispatch_request<B>(
	app: &App<B>,
	ctx: &ConnectionContext,
	request: ClientRequest,
	out_tx: &mpsc::UnboundedSender<Message>,
	room_tasks: &mut HashMap<DocId, JoinHandle<()>>,
) -> Result<(), String>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	let response = match request {
		ClientRequest::Sync { id, doc_id, operations, clock, presence } => {
			ensure_joined(app, ctx, &doc_id, out_tx, room_tasks);
			let room_tx = session::join_room(&doc_id);
			let started = Instant::now();
			let presence_patch = presence.and_then(|v| serde_json::from_value(v).ok());
			let result = sync_handler::handle_sync(
				app,
				ctx,
				&room_tx,
				&app.doc_type,
				doc_id.clone(),
				operations,
				clock,
				presence_patch,
			)
			.await;
			let duration = started.elapsed();
			let _ = app.events.send(ServerEvent::SyncRequest {
				doc_id: doc_id.clone(),
				clock,
				duration,
				devices_count: 1,
				clients_count: room_tx.receiver_count(),
				error: result.as_ref().err().map(ToString::to_string),
			});
			ServerResponse::Sync { id, outcome: to_sync_outcome(result) }
		}
		ClientRequest::Presence { id, doc_id, presence_patch } => {
			ensure_joined(app, ctx, &doc_id, out_tx, room_tasks);
			let room_tx = session::join_room(&doc_id);
			let delta = crate::presence::apply_patch(&doc_id, &ctx.socket_id, presence_patch);
			let _ = room_tx.send(RoomMessage {
				from_socket: ctx.socket_id.clone(),
				from_device: ctx.device_id.clone(),
				event: PushEvent::Presence { doc_id: doc_id.clone(), presence_patch: delta },
			});
			ServerResponse::Presence { id, outcome: Outcome::Success }
		}
		ClientRequest::DeleteDoc { id, doc_id } => {
			let outcome = delete_doc(app, &doc_id).await;
			ServerResponse::DeleteDoc { id, outcome }
		}
		ClientRequest::UnsubscribeDoc { id, doc_id } => {
			if let Some(handle) = room_tasks.remove(&doc_id) {
				handle.abort();
			}
			app.memberships.forget(&ctx.socket_id, &doc_id);
			crate::presence::remove_socket(&doc_id, &ctx.socket_id);
			session::prune_room_if_empty(&doc_id);
			ServerResponse::UnsubscribeDoc { id, outcome: Outcome::Success }
		}
	};

	if let Ok(text) = serde_json::to_string(&response) {
		let _ = out_tx.send(Message::Text(text.into()));
	}
	Ok(())
}

fn to_sync_outcome(result: ClResult<docsync_types::wire::SyncResult>) -> SyncOutcome {
	match result {
		Ok(res) => SyncOutcome::Success(res),
		Err(err) => SyncOutcome::Error(WireError { kind: wire_error_kind(&err), message: err.to_string() }),
	}
}

fn wire_error_kind(err: &Error) -> WireErrorKind {
	match err {
		Error::AuthorizationError(_) => WireErrorKind::AuthorizationError,
		Error::ValidationError(_) => WireErrorKind::ValidationError,
		_ => WireErrorKind::DatabaseError,
	}
}

async fn delete_doc<B>(app: &App<B>, doc_id: &DocId) -> Outcome
where
	B: DocBinding,
{
	match app.storage.transaction(docsync_types::storage::TxMode::ReadWrite).await {
		Ok(mut tx) => {
			if let Err(err) = tx.delete_doc(doc_id).await {
				warn!("delete-doc failed for {}: {}", doc_id, err);
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

// vim: ts=4
