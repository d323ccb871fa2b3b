//! Shared test fakes for the `docsync-client` integration tests: an in-memory
//! `ClientStorage` and a `Transport` that simulates a minimal authoritative
//! server (clock assignment, missing-operation replay, cross-device `dirty`
//! fan-out) without pulling in the `docsync-server` crate. Each test file
//! under `tests/` compiles as its own crate, so this lives under
//! `tests/support/mod.rs` and is brought in with `mod support;`.

use async_trait::async_trait;
use docsync_client::transport::Transport;
use docsync_types::error::ClResult;
use docsync_types::ids::{Clock, DocId};
use docsync_types::model::{OperationBatch, OperationLogEntry, OperationPayload, SerializedDoc, SnapshotPayload};
use docsync_types::storage::{ClientStorage, Transaction, TxMode};
use docsync_types::wire::{ClientRequest, Outcome, PushEvent, ServerResponse, SyncOutcome, SyncResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Clone, Default)]
struct DocState {
	doc: Option<SerializedDoc>,
	log: Vec<OperationBatch>,
}

/// An in-memory stand-in for an embedded client key-value store (§4.1,
/// §6.2). A single `RwLock` over every `docId`'s state gives real
/// read/write isolation: a `ReadWrite` transaction holds the write guard for
/// its whole lifetime, so two `readwrite` transactions for the same
/// (or different) `docId` still serialize against each other, a conservative
/// over-approximation of "conflicting transactions for the same docId"
/// (§4.1 Isolation) that is sufficient for these tests.
#[derive(Clone, Default)]
pub struct MemClientStorage {
	inner: Arc<RwLock<HashMap<DocId, DocState>>>,
}

impl MemClientStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn op_log_len(&self, doc_id: &DocId) -> usize {
		self.inner.read().await.get(doc_id).map_or(0, |state| state.log.len())
	}

	pub async fn snapshot_clock(&self, doc_id: &DocId) -> Option<Clock> {
		self.inner.read().await.get(doc_id).and_then(|state| state.doc.as_ref()).map(|row| row.clock)
	}
}

enum Guard {
	Read(OwnedRwLockReadGuard<HashMap<DocId, DocState>>),
	Write(OwnedRwLockWriteGuard<HashMap<DocId, DocState>>),
}

impl Guard {
	fn get(&self, doc_id: &DocId) -> Option<&DocState> {
		match self {
			Guard::Read(g) => g.get(doc_id),
			Guard::Write(g) => g.get(doc_id),
		}
	}

	fn get_mut(&mut self, doc_id: &DocId) -> &mut DocState {
		match self {
			Guard::Read(_) => panic!("test storage: write attempted against a readonly transaction"),
			Guard::Write(g) => g.entry(doc_id.clone()).or_default(),
		}
	}
}

pub struct MemTransaction {
	guard: Guard,
}

#[async_trait]
impl Transaction for MemTransaction {
	async fn get_serialized_doc(&mut self, doc_id: &DocId) -> ClResult<Option<SerializedDoc>> {
		Ok(self.guard.get(doc_id).and_then(|state| state.doc.clone()))
	}

	async fn get_operations(
		&mut self,
		doc_id: &DocId,
		_since_clock: Option<Clock>,
	) -> ClResult<Vec<OperationLogEntry>> {
		// Client-side log entries carry no meaningful per-entry clock (§4.1:
		// "on the client the returned clock is unused") — the sync engine's
		// own `read_outgoing` always calls this with `None` and discards the
		// entry clock, keeping only `batch`.
		let Some(state) = self.guard.get(doc_id) else { return Ok(Vec::new()) };
		Ok(state
			.log
			.iter()
			.map(|batch| OperationLogEntry { doc_id: doc_id.clone(), batch: batch.clone(), clock: Clock::ZERO })
			.collect())
	}

	async fn save_operations(&mut self, doc_id: &DocId, batch: OperationBatch) -> ClResult<Clock> {
		self.guard.get_mut(doc_id).log.push(batch);
		Ok(Clock::ZERO)
	}

	async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> ClResult<()> {
		let state = self.guard.get_mut(doc_id);
		let drain = count.min(state.log.len());
		state.log.drain(0..drain);
		Ok(())
	}

	async fn save_serialized_doc(
		&mut self,
		doc_id: &DocId,
		snapshot: SnapshotPayload,
		clock: Clock,
	) -> ClResult<()> {
		self.guard.get_mut(doc_id).doc = Some(SerializedDoc { doc_id: doc_id.clone(), snapshot, clock });
		Ok(())
	}

	async fn delete_doc(&mut self, doc_id: &DocId) -> ClResult<()> {
		let state = self.guard.get_mut(doc_id);
		state.doc = None;
		state.log.clear();
		Ok(())
	}

	async fn commit(&mut self) -> ClResult<()> {
		Ok(())
	}

	async fn rollback(&mut self) -> ClResult<()> {
		// Writes are applied to the shared map as each call is made rather than
		// buffered, so there is nothing to discard here beyond releasing the
		// guard (on `Drop`) — acceptable for a test fake since none of these
		// tests assert on partial-write rollback of the storage mock itself.
		Ok(())
	}
}

#[async_trait]
impl ClientStorage for MemClientStorage {
	async fn transaction(&self, mode: TxMode) -> ClResult<Box<dyn Transaction>> {
		let guard = match mode {
			TxMode::ReadOnly => Guard::Read(self.inner.clone().read_owned().await),
			TxMode::ReadWrite => Guard::Write(self.inner.clone().write_owned().await),
		};
		Ok(Box::new(MemTransaction { guard }))
	}
}

/// A minimal authoritative sequencer shared by every [`FakeTransport`] built
/// from [`FakeServer::connect`] — enough to exercise the client sync engine
/// against server-assigned clocks and cross-device `dirty` fan-out without
/// depending on `docsync-server`.
#[derive(Default)]
pub struct FakeServer {
	rooms: std::sync::Mutex<HashMap<DocId, Room>>,
}

#[derive(Default)]
struct Room {
	log: Vec<OperationPayload>,
	members: Vec<(u64, broadcast::Sender<PushEvent>)>,
}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

impl FakeServer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Build a new `Transport` talking to this fake server, as if a new
	/// device/connection had just authenticated.
	pub fn connect(self: &Arc<Self>) -> Arc<FakeTransport> {
		let id = NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed);
		let (events_tx, _) = broadcast::channel(64);
		let (lifecycle_tx, _) = broadcast::channel(4);
		let _ = lifecycle_tx.send(docsync_types::wire::ConnectionEvent::Open);
		Arc::new(FakeTransport {
			server: self.clone(),
			id,
			events_tx,
			lifecycle_tx,
			fail_next: AtomicU64::new(0),
			request_count: AtomicU64::new(0),
		})
	}

	fn sync(&self, transport_id: u64, events_tx: &broadcast::Sender<PushEvent>, doc_id: DocId, clock: Clock, ops: Vec<OperationPayload>) -> SyncResult {
		let mut rooms = self.rooms.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		let room = rooms.entry(doc_id.clone()).or_default();
		if !room.members.iter().any(|(id, _)| *id == transport_id) {
			room.members.push((transport_id, events_tx.clone()));
		}

		let missing: Vec<OperationPayload> = room.log.iter().skip(clock.0 as usize).cloned().collect();
		let sent = !ops.is_empty();
		if sent {
			room.log.extend(ops);
		}
		let new_clock = Clock(room.log.len() as u64);

		if sent {
			for (id, tx) in &room.members {
				if *id != transport_id {
					let _ = tx.send(PushEvent::Dirty { doc_id: doc_id.clone() });
				}
			}
		}

		SyncResult {
			doc_id,
			operations: if missing.is_empty() { None } else { Some(missing) },
			serialized_doc: None,
			clock: new_clock,
		}
	}
}

/// A `Transport` bound to one [`FakeServer`] connection (one simulated
/// device/tab). `fail_next` lets a test script a number of `NetworkError`
/// responses before requests start succeeding, to exercise the retry path
/// (§4.5 step 2, §7) without waiting out the real 5s wire timeout (B3).
pub struct FakeTransport {
	server: Arc<FakeServer>,
	id: u64,
	events_tx: broadcast::Sender<PushEvent>,
	lifecycle_tx: broadcast::Sender<docsync_types::wire::ConnectionEvent>,
	fail_next: AtomicU64,
	request_count: AtomicU64,
}

impl FakeTransport {
	/// Make the next `n` requests fail with a `NetworkError` before
	/// succeeding, simulating transient connectivity loss.
	pub fn fail_next_n(&self, n: u64) {
		self.fail_next.store(n, Ordering::Relaxed);
	}

	pub fn request_count(&self) -> u64 {
		self.request_count.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl Transport for FakeTransport {
	async fn request(&self, request: ClientRequest) -> ClResult<ServerResponse> {
		self.request_count.fetch_add(1, Ordering::Relaxed);

		let mut remaining = self.fail_next.load(Ordering::Relaxed);
		if remaining > 0 {
			remaining -= 1;
			self.fail_next.store(remaining, Ordering::Relaxed);
			return Err(docsync_types::error::Error::NetworkError("simulated transient failure".into()));
		}

		match request {
			ClientRequest::Sync { id, doc_id, operations, clock, .. } => {
				let result = self.server.sync(self.id, &self.events_tx, doc_id, clock, operations);
				Ok(ServerResponse::Sync { id, outcome: SyncOutcome::Success(result) })
			}
			ClientRequest::Presence { id, .. } => Ok(ServerResponse::Presence { id, outcome: Outcome::Success }),
			ClientRequest::DeleteDoc { id, .. } => Ok(ServerResponse::DeleteDoc { id, outcome: Outcome::Success }),
			ClientRequest::UnsubscribeDoc { id, .. } => {
				Ok(ServerResponse::UnsubscribeDoc { id, outcome: Outcome::Success })
			}
		}
	}

	fn events(&self) -> broadcast::Receiver<PushEvent> {
		self.events_tx.subscribe()
	}

	fn lifecycle(&self) -> broadcast::Receiver<docsync_types::wire::ConnectionEvent> {
		self.lifecycle_tx.subscribe()
	}
}

/// A [`docsync_client::client::SubscribeSink`] for tests: `subscribe` calls
/// every sink method synchronously before returning (the client never
/// defers `on_success`/`on_error` to a spawned task), so by the time
/// `subscribe(...).await` resolves, `result()` already holds the outcome.
pub struct TestSink<B: docsync_types::doc_binding::DocBinding> {
	loading: std::sync::atomic::AtomicBool,
	result: std::sync::Mutex<Option<Result<Option<Arc<tokio::sync::Mutex<docsync_client::cache::CacheEntry<B>>>>, docsync_types::error::Error>>>,
}

impl<B: docsync_types::doc_binding::DocBinding> Default for TestSink<B> {
	fn default() -> Self {
		Self { loading: std::sync::atomic::AtomicBool::new(false), result: std::sync::Mutex::new(None) }
	}
}

impl<B: docsync_types::doc_binding::DocBinding> TestSink<B> {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn saw_loading(&self) -> bool {
		self.loading.load(Ordering::Relaxed)
	}

	pub fn entry(&self) -> Option<Arc<tokio::sync::Mutex<docsync_client::cache::CacheEntry<B>>>> {
		match self.result.lock().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref() {
			Some(Ok(entry)) => entry.clone(),
			_ => None,
		}
	}

	pub fn is_error(&self) -> bool {
		matches!(self.result.lock().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref(), Some(Err(_)))
	}
}

impl<B: docsync_types::doc_binding::DocBinding> docsync_client::client::SubscribeSink<B> for TestSink<B> {
	fn on_loading(&self) {
		self.loading.store(true, Ordering::Relaxed);
	}

	fn on_success(&self, _doc_id: DocId, entry: Option<Arc<tokio::sync::Mutex<docsync_client::cache::CacheEntry<B>>>>) {
		*self.result.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Ok(entry));
	}

	fn on_error(&self, err: docsync_types::error::Error) {
		*self.result.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Err(err));
	}
}

// vim: ts=4
