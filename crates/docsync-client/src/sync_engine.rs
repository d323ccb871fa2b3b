//! The per-document client sync engine (§4.5 — "the hardest part"): the
//! three-state push/pull machine, the push body (read, send, consolidate,
//! fan-out), and the 50ms mutation throttle. Grounded on the teacher's
//! `crdt/websocket.rs` connection-loop shape for the request/response
//! correlation and on `core/scheduler.rs`'s single debounced-timer-per-key
//! pattern for the throttle, generalized from a fixed Yjs update payload to
//! the opaque operation batches the storage contract defines.
//!
//! The three states map onto a bounded queue of depth one plus an explicit
//! state flag: `Idle -> Pushing` spawns the actor loop; a trigger that lands
//! while `Pushing` flips to `PushingWithPending` without spawning anything,
//! collapsing any number of extra triggers into the single pending bit
//! (§4.5 "saveRemote is idempotent").

use crate::prelude::*;
use docsync_types::doc_binding::DocBinding;
use docsync_types::events::{ChangeOrigin, ClientEvent};
use docsync_types::model::{OperationBatch, OperationPayload};
use docsync_types::storage::{ClientStorage, TxMode};
use docsync_types::wire::{ClientRequest, SyncOutcome};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex as AsyncMutex, broadcast};

use crate::cache::DocCache;
use crate::inter_tab::TabMessage;
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PushState {
	Idle,
	Pushing,
	PushingWithPending,
}

struct DocPushState {
	state: AsyncMutex<PushState>,
}

impl Default for DocPushState {
	fn default() -> Self {
		Self { state: AsyncMutex::new(PushState::Idle) }
	}
}

/// Drives per-`docId` push/pull cycles for one [`crate::Client`] instance.
/// Every method that touches storage or the transport is a suspension point
/// (§5) — nothing here spins a dedicated OS thread; `trigger` spawns at most
/// one `tokio` task per `docId` per idle-to-pushing transition.
pub struct SyncEngine<B: DocBinding> {
	storage: Arc<dyn ClientStorage>,
	transport: Arc<dyn Transport>,
	doc_binding: Arc<B>,
	cache: Arc<DocCache<B>>,
	tab_bus: Arc<broadcast::Sender<TabMessage>>,
	tab_origin: u64,
	events_tx: broadcast::Sender<ClientEvent>,
	next_request_id: AtomicU64,
	docs: AsyncMutex<HashMap<DocId, Arc<DocPushState>>>,
}

impl<B> SyncEngine<B>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	pub fn new(
		storage: Arc<dyn ClientStorage>,
		transport: Arc<dyn Transport>,
		doc_binding: Arc<B>,
		cache: Arc<DocCache<B>>,
		tab_bus: Arc<broadcast::Sender<TabMessage>>,
		tab_origin: u64,
		events_tx: broadcast::Sender<ClientEvent>,
	) -> Arc<Self> {
		Arc::new(Self {
			storage,
			transport,
			doc_binding,
			cache,
			tab_bus,
			tab_origin,
			events_tx,
			next_request_id: AtomicU64::new(1),
			docs: AsyncMutex::new(HashMap::new()),
		})
	}

	async fn state_for(&self, doc_id: &DocId) -> Arc<DocPushState> {
		let mut docs = self.docs.lock().await;
		docs.entry(doc_id.clone()).or_default().clone()
	}

	/// A peer tab just applied operations we haven't pushed yet. If this
	/// `docId` is mid-push, flip to `pushing-with-pending` so the next push
	/// picks up the freshly-applied local writes (§4.6: "the engine flips its
	/// state to pushing-with-pending").
	pub async fn note_peer_operations(self: &Arc<Self>, doc_id: &DocId) {
		let push_state = self.state_for(doc_id).await;
		let mut state = push_state.state.lock().await;
		if *state == PushState::Pushing {
			*state = PushState::PushingWithPending;
		}
	}

	/// Entry point for every trigger: a fired mutation throttle, a `dirty`
	/// hint, or an explicit `saveRemote`. Idempotent (§4.5, R3): extra calls
	/// while pushing collapse into the pending bit; extra calls while idle
	/// spawn exactly one push-cycle loop (I3: at most one in-flight request).
	pub async fn trigger(self: &Arc<Self>, doc_id: DocId) {
		let push_state = self.state_for(&doc_id).await;
		let should_spawn = {
			let mut state = push_state.state.lock().await;
			match *state {
				PushState::Idle => {
					*state = PushState::Pushing;
					true
				}
				PushState::Pushing => {
					*state = PushState::PushingWithPending;
					false
				}
				PushState::PushingWithPending => false,
			}
		};
		if should_spawn {
			let engine = self.clone();
			tokio::spawn(async move {
				engine.run_until_idle(doc_id, push_state).await;
			});
		}
	}

	async fn run_until_idle(self: Arc<Self>, doc_id: DocId, push_state: Arc<DocPushState>) {
		loop {
			if let Err(err) = self.push_cycle(&doc_id).await {
				warn!("sync: push cycle failed for {}, retrying: {}", doc_id, err);
				// Transient failures retry immediately (§4.5 step 2, §7): the
				// request itself is bounded by the 5s wire timeout, so this
				// loop cannot spin faster than that.
				continue;
			}
			let mut state = push_state.state.lock().await;
			match *state {
				PushState::PushingWithPending => {
					*state = PushState::Pushing;
					continue;
				}
				_ => {
					*state = PushState::Idle;
					break;
				}
			}
		}
	}

	/// One push cycle: read phase, send, consolidate, fan-out (§4.5). Returns
	/// `Err` only for transport/wire failures that warrant an immediate retry;
	/// storage failures during consolidation are also surfaced as `Err` so the
	/// caller retries (a failed consolidation must never partially delete the
	/// op log — see the transactional note below).
	async fn push_cycle(&self, doc_id: &DocId) -> ClResult<()> {
		let (batches, stored_clock) = self.read_outgoing(doc_id).await?;
		let flattened: Vec<OperationPayload> =
			batches.iter().flat_map(|b| b.operations.clone()).collect();

		let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
		let request = ClientRequest::Sync {
			id: request_id,
			doc_id: doc_id.clone(),
			operations: flattened.clone(),
			clock: stored_clock,
			presence: None,
		};

		let response = self.transport.request(request.clone()).await;
		let response = match response {
			Ok(resp) => resp,
			Err(err) => {
				let _ = self.events_tx.send(ClientEvent::Sync {
					request,
					outcome: SyncOutcome::Error(docsync_types::wire::WireError {
						kind: docsync_types::wire::WireErrorKind::DatabaseError,
						message: err.to_string(),
					}),
				});
				return Err(err);
			}
		};

		let docsync_types::wire::ServerResponse::Sync { outcome, .. } = response else {
			return Err(Error::Internal("sync engine received a non-sync response".into()));
		};

		let result = match outcome.clone() {
			SyncOutcome::Success(result) => {
				let _ = self.events_tx.send(ClientEvent::Sync { request, outcome });
				result
			}
			SyncOutcome::Error(err) => {
				let _ = self.events_tx.send(ClientEvent::Sync { request, outcome });
				return Err(wire_error_to_engine_error(&err));
			}
		};

		let consolidated = self.consolidate(doc_id, batches.len(), &flattened, &result).await?;

		if let Some(applied_server_ops) = consolidated {
			self.fan_out(doc_id, applied_server_ops).await;
		}
		Ok(())
	}

	async fn read_outgoing(&self, doc_id: &DocId) -> ClResult<(Vec<OperationBatch>, Clock)> {
		let mut tx = self.storage.transaction(TxMode::ReadOnly).await?;
		let entries = tx.get_operations(doc_id, None).await?;
		let batches: Vec<OperationBatch> = entries.into_iter().map(|e| e.batch).collect();
		let stored_clock = tx.get_serialized_doc(doc_id).await?.map(|row| row.clock).unwrap_or(Clock::ZERO);
		tx.commit().await?;
		Ok((batches, stored_clock))
	}

	/// §4.5 step 3. Returns `Some(server_ops)` if a fresh snapshot was
	/// written (so the caller fans out those operations to peers), or `None`
	/// if consolidation was skipped (no snapshot row yet, or a concurrent
	/// writer already consolidated past `response.clock`).
	async fn consolidate(
		&self,
		doc_id: &DocId,
		sent_batch_count: usize,
		sent_ops: &[OperationPayload],
		response: &docsync_types::wire::SyncResult,
	) -> ClResult<Option<Vec<OperationPayload>>> {
		let mut tx = self.storage.transaction(TxMode::ReadWrite).await?;

		if sent_batch_count > 0 {
			tx.delete_operations(doc_id, sent_batch_count).await?;
		}

		let Some(row) = tx.get_serialized_doc(doc_id).await? else {
			// No local snapshot at all: the throttle's writeback transaction
			// is responsible for seeding one on first mutation (§3 Lifecycle
			// "persisted on first mutation"), so reaching this branch means
			// the doc was deleted locally out from under this push — nothing
			// to consolidate.
			tx.commit().await?;
			return Ok(None);
		}
		if row.clock >= response.clock {
			// Another writer (a peer tab sharing this storage) already
			// consolidated past this point (§4.5 step 3, B2).
			tx.commit().await?;
			return Ok(None);
		}

		let server_ops = response.operations.clone().unwrap_or_default();
		let doc_type_snapshot = row.snapshot;

		let reconstructed = self.fold_snapshot(doc_id, doc_type_snapshot, &server_ops, sent_ops).await?;

		// Re-read before writing: abort if another writer raced us past this
		// clock while we were folding (§4.5 step 3 "before write, re-read the
		// snapshot; if its clock changed during this transaction, abort").
		let current = tx.get_serialized_doc(doc_id).await?;
		if current.map(|r| r.clock) != Some(row.clock) {
			tx.rollback().await?;
			return Ok(None);
		}

		tx.save_serialized_doc(doc_id, reconstructed, response.clock).await?;
		tx.commit().await?;

		Ok(Some(server_ops))
	}

	/// Deserialize `snapshot`, apply `server_ops` then `sent_ops` (server ops
	/// first so the reconstructed document matches the server's view, §5
	/// Ordering guarantees), and reserialize.
	async fn fold_snapshot(
		&self,
		doc_id: &DocId,
		snapshot: docsync_types::model::SnapshotPayload,
		server_ops: &[OperationPayload],
		sent_ops: &[OperationPayload],
	) -> ClResult<docsync_types::model::SnapshotPayload> {
		let entry = self
			.cache
			.get(doc_id)
			.await
			.ok_or_else(|| Error::Internal(format!("consolidate: {doc_id} missing from cache")))?;
		let doc_type = entry.lock().await.doc_type.clone();

		let typed_snapshot: B::Snapshot = serde_json::from_value(snapshot)?;
		let mut doc = self
			.doc_binding
			.deserialize(&doc_type, &typed_snapshot)
			.map_err(docsync_types::doc_binding::wrap_binding_error)?;

		let mut ops = Vec::with_capacity(server_ops.len() + sent_ops.len());
		for op in server_ops.iter().chain(sent_ops.iter()) {
			ops.push(serde_json::from_value::<B::Operation>(op.clone())?);
		}
		self.doc_binding.apply_operations(&mut doc, &ops).map_err(docsync_types::doc_binding::wrap_binding_error)?;

		let serialized = self.doc_binding.serialize(&doc).map_err(docsync_types::doc_binding::wrap_binding_error)?;
		self.doc_binding.dispose(doc);
		Ok(serde_json::to_value(serialized)?)
	}

	/// §4.5 step 4: apply the server's operations to the live in-memory
	/// document under the reentrancy guard, then post one inter-tab broadcast
	/// per server operation so peer tabs converge the same way.
	async fn fan_out(&self, doc_id: &DocId, server_ops: Vec<OperationPayload>) {
		if server_ops.is_empty() {
			return;
		}
		let Some(entry) = self.cache.get(doc_id).await else {
			return;
		};
		let typed_ops: Vec<B::Operation> = match server_ops
			.iter()
			.map(|v| serde_json::from_value::<B::Operation>(v.clone()))
			.collect::<Result<Vec<_>, _>>()
		{
			Ok(ops) => ops,
			Err(err) => {
				warn!("sync: undeserializable server operation for {}: {}", doc_id, err);
				return;
			}
		};

		{
			let mut guard = entry.lock().await;
			let _apply_guard = crate::cache::ApplyGuard::enter(guard.applying.clone());
			if let Err(err) = self.doc_binding.apply_operations(&mut guard.doc, &typed_ops) {
				warn!("sync: failed to apply server operations to {}: {}", doc_id, err);
				return;
			}
		}
		let _ = self.events_tx.send(ClientEvent::Change { doc_id: doc_id.clone(), origin: ChangeOrigin::Remote });

		let _ = self.tab_bus.send(TabMessage::Operations {
			doc_id: doc_id.clone(),
			operations: server_ops,
			origin: self.tab_origin,
		});
	}
}

fn wire_error_to_engine_error(err: &docsync_types::wire::WireError) -> Error {
	match err.kind {
		docsync_types::wire::WireErrorKind::AuthorizationError => Error::AuthorizationError(err.message.clone()),
		docsync_types::wire::WireErrorKind::ValidationError => Error::ValidationError(err.message.clone()),
		docsync_types::wire::WireErrorKind::DatabaseError => Error::DatabaseError(err.message.clone()),
	}
}

// vim: ts=4
