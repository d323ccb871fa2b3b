//! `tokio-tungstenite`-backed [`Transport`] (§4.3, §6.1). Grounded on the
//! teacher's `crdt/websocket.rs` connection-loop shape (split sink behind a
//! `tokio::sync::Mutex`, a background task draining the read half), adapted
//! from the server side of an axum `WebSocket` to the client side of a plain
//! `tokio-tungstenite` stream, and generalized from binary Yjs frames to the
//! engine's tagged JSON request/response/event messages.

use super::Transport;
use crate::prelude::*;
use async_trait::async_trait;
use docsync_types::wire::{ClientRequest, ConnectionEvent, PushEvent, ServerResponse};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<ServerResponse>>>;

/// A connected WebSocket transport. Construction performs the handshake;
/// `request`/`events`/`lifecycle` are cheap, cloneable handles backed by the
/// same background read task.
pub struct WsTransport {
	pending: PendingMap,
	write_tx: tokio::sync::mpsc::UnboundedSender<WsMessage>,
	events_tx: broadcast::Sender<PushEvent>,
	lifecycle_tx: broadcast::Sender<ConnectionEvent>,
}

impl WsTransport {
	/// Connect to `url` (e.g. `ws://host/ws/docsync?token=..&device_id=..`)
	/// and spawn the background read/write pump.
	pub async fn connect(url: &str) -> ClResult<std::sync::Arc<Self>> {
		let (stream, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|err| Error::NetworkError(format!("websocket connect failed: {err}")))?;
		let (mut ws_tx, mut ws_rx) = stream.split();

		let (events_tx, _) = broadcast::channel(256);
		let (lifecycle_tx, _) = broadcast::channel(16);
		let (write_tx, mut write_rx) = tokio::sync::mpsc::unbounded_channel::<WsMessage>();

		let transport = std::sync::Arc::new(Self {
			pending: Mutex::new(HashMap::new()),
			write_tx,
			events_tx: events_tx.clone(),
			lifecycle_tx: lifecycle_tx.clone(),
		});

		let _ = lifecycle_tx.send(ConnectionEvent::Open);

		tokio::spawn(async move {
			while let Some(msg) = write_rx.recv().await {
				if ws_tx.send(msg).await.is_err() {
					break;
				}
			}
		});

		let read_transport = transport.clone();
		tokio::spawn(async move {
			while let Some(msg) = ws_rx.next().await {
				match msg {
					Ok(WsMessage::Text(text)) => read_transport.dispatch_incoming(&text),
					Ok(WsMessage::Close(frame)) => {
						let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
						let _ = read_transport.lifecycle_tx.send(ConnectionEvent::Close { reason });
						break;
					}
					Ok(_) => {}
					Err(err) => {
						let _ = read_transport
							.lifecycle_tx
							.send(ConnectionEvent::Error { message: err.to_string() });
						break;
					}
				}
			}
		});

		Ok(transport)
	}

	fn dispatch_incoming(&self, text: &str) {
		if let Ok(response) = serde_json::from_str::<ServerResponse>(text) {
			let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			if let Some(sender) = pending.remove(&response.id()) {
				let _ = sender.send(response);
			}
			return;
		}
		if let Ok(event) = serde_json::from_str::<PushEvent>(text) {
			let _ = self.events_tx.send(event);
			return;
		}
		warn!("ws transport: unrecognized frame, dropping: {}", text);
	}
}

#[async_trait]
impl Transport for WsTransport {
	async fn request(&self, request: ClientRequest) -> ClResult<ServerResponse> {
		let id = request.id();
		let (tx, rx) = oneshot::channel();
		{
			let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			pending.insert(id, tx);
		}

		let text = serde_json::to_string(&request)?;
		if self.write_tx.send(WsMessage::Text(text.into())).is_err() {
			let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			pending.remove(&id);
			return Err(Error::NetworkError("transport write half closed".into()));
		}

		super::with_timeout(async move {
			rx.await.map_err(|_| Error::NetworkError("response channel closed".into()))
		})
		.await
	}

	fn events(&self) -> broadcast::Receiver<PushEvent> {
		self.events_tx.subscribe()
	}

	fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.lifecycle_tx.subscribe()
	}
}

// vim: ts=4
