//! The client facade (§4.4 subscribe API, §4.5 mutation throttle, §4.6/§4.7
//! wiring): owns the [`crate::cache::DocCache`], the
//! [`crate::sync_engine::SyncEngine`], the inter-tab bus, and the background
//! tasks that drain server-initiated events and peer-tab broadcasts. Grounded
//! on the `AppBuilder`/`AppState` split the server crate uses (a plain struct
//! of shared `Arc` handles, constructed once and cloned cheaply into every
//! background task).

use crate::cache::{ApplyGuard, CacheEntry, DocCache, LoadOutcome};
use crate::inter_tab::{self, PresencePatch, TabMessage};
use crate::prelude::*;
use crate::presence::{PresenceDebouncer, merge_and_notify};
use crate::sync_engine::SyncEngine;
use crate::transport::Transport;
use docsync_types::doc_binding::{DocBinding, FnChangeSink};
use docsync_types::events::{ChangeOrigin, ClientEvent, LoadSource};
use docsync_types::ids::generate_doc_id;
use docsync_types::model::{OperationBatch, OperationPayload};
use docsync_types::storage::{ClientStorage, TxMode};
use docsync_types::wire::{ClientRequest, ConnectionEvent, PushEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex as AsyncMutex, broadcast};

/// What `subscribe` was asked to resolve (§4.4).
pub enum SubscribeArgs {
	/// Load an existing document; resolves to `None` if absent.
	Load { doc_type: Box<str>, id: DocId },
	/// Create a new document with an auto-generated id. Pure and synchronous
	/// (§4.4: "emits success synchronously").
	CreateNew { doc_type: Box<str> },
	/// Load `id` if it exists, otherwise create it.
	LoadOrCreate { doc_type: Box<str>, id: DocId },
}

impl SubscribeArgs {
	fn doc_type(&self) -> &str {
		match self {
			SubscribeArgs::Load { doc_type, .. }
			| SubscribeArgs::CreateNew { doc_type }
			| SubscribeArgs::LoadOrCreate { doc_type, .. } => doc_type,
		}
	}
}

/// Receives the `subscribe` lifecycle (§4.4): zero or one `loading`, then
/// exactly one of `success`/`error`. `success` carries `None` when the
/// requested `docId` does not exist (a plain `Load` against an absent id).
pub trait SubscribeSink<B: DocBinding>: Send + Sync {
	fn on_loading(&self) {}
	fn on_success(&self, doc_id: DocId, entry: Option<Arc<AsyncMutex<CacheEntry<B>>>>);
	fn on_error(&self, err: Error);
}

struct MutationQueue {
	pending: Vec<OperationPayload>,
	timer: Option<tokio::task::JoinHandle<()>>,
}

/// Local-mutation coalescing window (§4.5 "Throttling").
pub const MUTATION_THROTTLE: std::time::Duration = std::time::Duration::from_millis(50);

/// A cancellable subscription handle (§4.4: "subscribe returns an unsubscribe
/// function"). Release runs in the background; callers that need the eviction
/// to be visible before proceeding should await [`Client::events`] for the
/// matching `DocUnload`.
pub struct Subscription<B: DocBinding> {
	client: Arc<Client<B>>,
	doc_id: DocId,
}

impl<B> Subscription<B>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	pub fn doc_id(&self) -> &DocId {
		&self.doc_id
	}

	/// Marks the entry for eviction and returns immediately (§5 Cancellation).
	pub fn unsubscribe(self) {
		let client = self.client;
		let doc_id = self.doc_id;
		tokio::spawn(async move {
			client.release(&doc_id).await;
		});
	}
}

/// The sync engine's client facade: one instance per tab/process connection.
pub struct Client<B: DocBinding> {
	device_id: DeviceId,
	storage: Arc<dyn ClientStorage>,
	transport: Arc<dyn Transport>,
	doc_binding: Arc<B>,
	cache: Arc<DocCache<B>>,
	sync_engine: Arc<SyncEngine<B>>,
	tab_bus: Arc<broadcast::Sender<TabMessage>>,
	tab_origin: u64,
	presence_debouncer: PresenceDebouncer,
	mutations: AsyncMutex<HashMap<DocId, MutationQueue>>,
	events_tx: broadcast::Sender<ClientEvent>,
	/// Correlation ids for requests the client mints outside the sync engine
	/// (`presence`, `unsubscribe-doc`) — each transport keys its pending-response
	/// table by this id, so concurrent requests need distinct ones.
	next_request_id: AtomicU64,
}

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl<B> Client<B>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	/// Build a client bound to one user's storage and one live transport
	/// connection, and spawn the background tasks that drain server events
	/// and the inter-tab bus. `device_id` is expected to have already been
	/// resolved via [`crate::device::get_or_create`].
	pub fn new(
		user_id: &str,
		device_id: DeviceId,
		storage: Arc<dyn ClientStorage>,
		transport: Arc<dyn Transport>,
		doc_binding: Arc<B>,
	) -> Arc<Self> {
		let cache = Arc::new(DocCache::default());
		let tab_bus = inter_tab::join(user_id);
		let tab_origin = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
		let (events_tx, _) = broadcast::channel(256);

		let sync_engine = SyncEngine::new(
			storage.clone(),
			transport.clone(),
			doc_binding.clone(),
			cache.clone(),
			tab_bus.clone(),
			tab_origin,
			events_tx.clone(),
		);

		let client = Arc::new(Self {
			device_id,
			storage,
			transport,
			doc_binding,
			cache,
			sync_engine,
			tab_bus,
			tab_origin,
			presence_debouncer: PresenceDebouncer::default(),
			mutations: AsyncMutex::new(HashMap::new()),
			events_tx,
			next_request_id: AtomicU64::new(1),
		});

		client.clone().spawn_server_event_loop();
		client.clone().spawn_lifecycle_loop();
		client.clone().spawn_tab_bus_loop();
		client
	}

	pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
		self.events_tx.subscribe()
	}

	pub fn device_id(&self) -> &DeviceId {
		&self.device_id
	}

	pub fn cache(&self) -> &Arc<DocCache<B>> {
		&self.cache
	}

	fn spawn_server_event_loop(self: Arc<Self>) {
		let mut rx = self.transport.events();
		tokio::spawn(async move {
			loop {
				match rx.recv().await {
					Ok(event) => self.handle_push_event(event).await,
					Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		});
	}

	fn spawn_lifecycle_loop(self: Arc<Self>) {
		let mut rx = self.transport.lifecycle();
		tokio::spawn(async move {
			loop {
				match rx.recv().await {
					Ok(ConnectionEvent::Open) => {
						let _ = self.events_tx.send(ClientEvent::Connect);
					}
					Ok(ConnectionEvent::Close { reason }) => {
						let _ = self.events_tx.send(ClientEvent::Disconnect { reason });
					}
					Ok(ConnectionEvent::Error { message }) => {
						let _ = self.events_tx.send(ClientEvent::Disconnect { reason: message });
					}
					Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		});
	}

	/// §4.6: apply a peer tab's broadcast, never re-broadcasting and never
	/// pushing to the server (the originating tab already owns that).
	fn spawn_tab_bus_loop(self: Arc<Self>) {
		let mut rx = self.tab_bus.subscribe();
		tokio::spawn(async move {
			loop {
				match rx.recv().await {
					Ok(msg) if msg.origin() == self.tab_origin => continue,
					Ok(TabMessage::Operations { doc_id, operations, .. }) => {
						self.apply_peer_operations(&doc_id, operations).await;
					}
					Ok(TabMessage::Presence { doc_id, presence, .. }) => {
						self.apply_presence_patch(&doc_id, &presence).await;
					}
					Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		});
	}

	async fn apply_peer_operations(&self, doc_id: &DocId, operations: Vec<OperationPayload>) {
		if operations.is_empty() {
			return;
		}
		self.sync_engine.note_peer_operations(doc_id).await;
		let Some(entry) = self.cache.get(doc_id).await else { return };
		let typed: Vec<B::Operation> = match operations
			.iter()
			.map(|v| serde_json::from_value::<B::Operation>(v.clone()))
			.collect::<Result<Vec<_>, _>>()
		{
			Ok(ops) => ops,
			Err(err) => {
				warn!("inter-tab: undeserializable operation for {}: {}", doc_id, err);
				return;
			}
		};
		{
			let mut guard = entry.lock().await;
			let _apply_guard = ApplyGuard::enter(guard.applying.clone());
			if let Err(err) = self.doc_binding.apply_operations(&mut guard.doc, &typed) {
				warn!("inter-tab: failed to apply peer operations to {}: {}", doc_id, err);
				return;
			}
		}
		let _ = self.events_tx.send(ClientEvent::Change { doc_id: doc_id.clone(), origin: ChangeOrigin::Broadcast });
	}

	async fn apply_presence_patch(&self, doc_id: &DocId, patch: &PresencePatch) {
		let Some(entry) = self.cache.get(doc_id).await else { return };
		let mut guard = entry.lock().await;
		let subscribers = guard.presence_subscribers.clone();
		merge_and_notify(doc_id, &mut guard.presence, patch, &subscribers);
	}

	async fn handle_push_event(&self, event: PushEvent) {
		match event {
			PushEvent::Dirty { doc_id } => {
				// The only correct response to "there may be server
				// operations you don't have yet" is to trigger the push/pull
				// cycle (§4.3); `push_cycle` re-reads the local op log
				// itself, so a dirty hint with nothing to push becomes a
				// pure pull (B1).
				self.sync_engine.trigger(doc_id).await;
			}
			PushEvent::Presence { doc_id, presence_patch } => {
				self.apply_presence_patch(&doc_id, &presence_patch).await;
			}
			PushEvent::PresenceSnapshot { doc_id, presence } => {
				if let Some(entry) = self.cache.get(&doc_id).await {
					let mut guard = entry.lock().await;
					guard.presence = presence;
					let subscribers = guard.presence_subscribers.clone();
					for sub in &subscribers {
						sub.on_presence(&doc_id, &guard.presence);
					}
				}
			}
		}
	}

	/// §4.4 `subscribe`. Returns the subscription handle once the
	/// loading/success/error sequence has been emitted to `sink`.
	pub async fn subscribe(
		self: &Arc<Self>,
		args: SubscribeArgs,
		sink: Arc<dyn SubscribeSink<B>>,
	) -> Subscription<B> {
		let doc_type: Box<str> = args.doc_type().into();
		match args {
			SubscribeArgs::CreateNew { .. } => {
				// Pure and synchronous: no `loading` emission (§4.4).
				self.create_and_insert(generate_doc_id(), doc_type, sink).await
			}
			SubscribeArgs::Load { id, .. } => {
				sink.on_loading();
				self.subscribe_existing(id, doc_type, sink, false).await
			}
			SubscribeArgs::LoadOrCreate { id, .. } => {
				sink.on_loading();
				self.subscribe_existing(id, doc_type, sink, true).await
			}
		}
	}

	async fn subscribe_existing(
		self: &Arc<Self>,
		doc_id: DocId,
		doc_type: Box<str>,
		sink: Arc<dyn SubscribeSink<B>>,
		create_if_absent: bool,
	) -> Subscription<B> {
		match self.cache.begin_subscribe(&doc_id).await {
			crate::cache::SubscribeLead::CacheHit(entry) => {
				let _ = self
					.events_tx
					.send(ClientEvent::DocLoad { doc_id: doc_id.clone(), source: LoadSource::Cache });
				sink.on_success(doc_id.clone(), Some(entry));
				Subscription { client: self.clone(), doc_id }
			}
			crate::cache::SubscribeLead::JoinPending(mut rx) => {
				match rx.recv().await {
					Ok(LoadOutcome::Ready) => match self.cache.join_after_load(&doc_id).await {
						Some(entry) => sink.on_success(doc_id.clone(), Some(entry)),
						None => sink.on_error(Error::Internal("load resolved but cache entry vanished".into())),
					},
					Ok(LoadOutcome::Absent) => sink.on_success(doc_id.clone(), None),
					Ok(LoadOutcome::Failed(msg)) => sink.on_error(Error::Internal(msg.to_string())),
					Err(_) => sink.on_error(Error::Internal("pending load sender dropped".into())),
				}
				Subscription { client: self.clone(), doc_id }
			}
			crate::cache::SubscribeLead::MustLoad => self.load_existing(doc_id, doc_type, sink, create_if_absent).await,
		}
	}

	/// Resolve a `MustLoad` lead: read the local snapshot, deserialize it,
	/// and insert it into the cache. When `create_if_absent` is set (§4.4
	/// `loadOrCreate`) and no snapshot exists, falls through to creating a
	/// fresh document at the same `docId` instead of resolving absent.
	async fn load_existing(
		self: &Arc<Self>,
		doc_id: DocId,
		doc_type: Box<str>,
		sink: Arc<dyn SubscribeSink<B>>,
		create_if_absent: bool,
	) -> Subscription<B> {
		match self.read_snapshot(&doc_id).await {
			Ok(Some(snapshot)) => match self.doc_binding.deserialize(&doc_type, &snapshot) {
				Ok(doc) => {
					let entry = self.finish_load(&doc_id, doc, doc_type, LoadSource::Local).await;
					sink.on_success(doc_id.clone(), Some(entry));
				}
				Err(err) => {
					let msg = docsync_types::doc_binding::wrap_binding_error(err).to_string();
					self.cache.fail_load(&doc_id, msg.clone()).await;
					sink.on_error(Error::Internal(msg));
				}
			},
			Ok(None) if create_if_absent => {
				return self.create_and_insert(doc_id, doc_type, sink).await;
			}
			Ok(None) => {
				self.cache.mark_absent(&doc_id).await;
				sink.on_success(doc_id.clone(), None);
			}
			Err(err) => {
				self.cache.fail_load(&doc_id, err.to_string()).await;
				sink.on_error(err);
			}
		}
		Subscription { client: self.clone(), doc_id }
	}

	async fn create_and_insert(
		self: &Arc<Self>,
		doc_id: DocId,
		doc_type: Box<str>,
		sink: Arc<dyn SubscribeSink<B>>,
	) -> Subscription<B> {
		match self.doc_binding.create(&doc_type) {
			Ok(doc) => {
				let entry = self.finish_load(&doc_id, doc, doc_type, LoadSource::Created).await;
				sink.on_success(doc_id.clone(), Some(entry));
			}
			Err(err) => {
				let msg = docsync_types::doc_binding::wrap_binding_error(err).to_string();
				self.cache.fail_load(&doc_id, msg.clone()).await;
				sink.on_error(Error::Internal(msg));
			}
		}
		Subscription { client: self.clone(), doc_id }
	}

	/// Insert into the cache and register the change sink that funnels local
	/// mutations into the throttle (§4.5). Returns the freshly inserted entry
	/// at `ref_count = 1`, belonging to this subscribe call.
	async fn finish_load(
		self: &Arc<Self>,
		doc_id: &DocId,
		doc: B::Document,
		doc_type: Box<str>,
		source: LoadSource,
	) -> Arc<AsyncMutex<CacheEntry<B>>> {
		let entry = self.cache.complete_load(doc_id, doc, doc_type).await;
		{
			let guard = entry.lock().await;
			let client = self.clone();
			let bound_doc_id = doc_id.clone();
			let applying = guard.applying.clone();
			self.doc_binding.on_change(
				&guard.doc,
				Arc::new(FnChangeSink::new(move |ops: Vec<B::Operation>| {
					if applying.load(std::sync::atomic::Ordering::SeqCst) {
						return;
					}
					let client = client.clone();
					let doc_id = bound_doc_id.clone();
					tokio::spawn(async move {
						client.queue_local_mutation(doc_id, ops).await;
					});
				})),
			);
		}
		let _ = self.events_tx.send(ClientEvent::DocLoad { doc_id: doc_id.clone(), source });
		entry
	}

	async fn read_snapshot(&self, doc_id: &DocId) -> ClResult<Option<B::Snapshot>> {
		let mut tx = self.storage.transaction(TxMode::ReadOnly).await?;
		let row = tx.get_serialized_doc(doc_id).await?;
		tx.commit().await?;
		match row {
			Some(row) => Ok(Some(serde_json::from_value(row.snapshot)?)),
			None => Ok(None),
		}
	}

	/// §4.5 "Throttling": queue a local mutation and (re)arm the 50ms
	/// coalescing timer. Multiple mutations within the window collapse into
	/// one writeback transaction and one trigger (I5 depends on this: ops
	/// written together are deleted together once acknowledged).
	async fn queue_local_mutation(self: Arc<Self>, doc_id: DocId, ops: Vec<B::Operation>) {
		let payloads: Vec<OperationPayload> = match ops.iter().map(serde_json::to_value).collect() {
			Ok(v) => v,
			Err(err) => {
				warn!("mutation throttle: failed to serialize local operations for {}: {}", doc_id, err);
				return;
			}
		};

		let _ = self.events_tx.send(ClientEvent::Change { doc_id: doc_id.clone(), origin: ChangeOrigin::Local });

		let mut mutations = self.mutations.lock().await;
		let queue =
			mutations.entry(doc_id.clone()).or_insert_with(|| MutationQueue { pending: Vec::new(), timer: None });
		queue.pending.extend(payloads);
		if queue.timer.is_none() {
			let client = self.clone();
			let timer_doc_id = doc_id.clone();
			queue.timer = Some(tokio::spawn(async move {
				tokio::time::sleep(MUTATION_THROTTLE).await;
				client.flush_mutations(timer_doc_id).await;
			}));
		}
	}

	async fn flush_mutations(self: Arc<Self>, doc_id: DocId) {
		let pending = {
			let mut mutations = self.mutations.lock().await;
			match mutations.remove(&doc_id) {
				Some(queue) => queue.pending,
				None => return,
			}
		};
		if pending.is_empty() {
			return;
		}

		if let Err(err) = self.writeback(&doc_id, &pending).await {
			warn!("mutation throttle: writeback failed for {}: {}", doc_id, err);
			return;
		}
		self.sync_engine.trigger(doc_id).await;
	}

	/// Persist queued operations to local storage. Seeds the initial snapshot
	/// row from the live in-memory document if none exists yet (§3 Lifecycle:
	/// "persisted on first mutation") so a later consolidate's
	/// `get_serialized_doc` is never spuriously absent for a document that is
	/// actually live in the cache.
	async fn writeback(&self, doc_id: &DocId, pending: &[OperationPayload]) -> ClResult<()> {
		let mut tx = self.storage.transaction(TxMode::ReadWrite).await?;

		if tx.get_serialized_doc(doc_id).await?.is_none() {
			if let Some(entry) = self.cache.get(doc_id).await {
				let guard = entry.lock().await;
				let snapshot =
					self.doc_binding.serialize(&guard.doc).map_err(docsync_types::doc_binding::wrap_binding_error)?;
				let snapshot_value = serde_json::to_value(snapshot)?;
				drop(guard);
				tx.save_serialized_doc(doc_id, snapshot_value, Clock::ZERO).await?;
			}
		}

		tx.save_operations(doc_id, OperationBatch::new(pending.to_vec())).await?;
		tx.commit().await
	}

	/// §4.7 `setPresence`, debounced 50ms, keeping only the latest value.
	/// Never persisted to local storage; broadcast to peer tabs and pushed to
	/// the server on flush.
	pub async fn set_presence(self: &Arc<Self>, doc_id: DocId, value: serde_json::Value) {
		let client = self.clone();
		self.presence_debouncer
			.schedule(doc_id.clone(), async move {
				// The wire key is a placeholder the server discards in favor of
				// the connection's real socketId (§4.7, §4.8 step 3), but peer
				// tabs on this device merge the inter-tab copy of this patch
				// directly, with no server re-keying in between — so that copy
				// must carry a key unique to this tab, not a literal shared by
				// every tab on the device (colliding with each other, and with
				// the server-keyed entry this same write eventually produces).
				let wire_patch = HashMap::from([(Box::<str>::from("self"), value.clone())]);
				let request = ClientRequest::Presence {
					id: client.next_request_id.fetch_add(1, Ordering::Relaxed),
					doc_id: doc_id.clone(),
					presence_patch: wire_patch,
				};
				if let Err(err) = client.transport.request(request).await {
					warn!("presence: failed to push patch for {}: {}", doc_id, err);
				}
				let tab_patch = HashMap::from([(client.tab_identity(), value)]);
				let _ =
					client.tab_bus.send(TabMessage::Presence { doc_id, presence: tab_patch, origin: client.tab_origin });
			})
			.await;
	}

	/// A key unique to this tab/connection within the device's inter-tab bus
	/// (§4.6), distinct from the server-assigned `socketId` peers also see via
	/// `PushEvent::Presence` — peer tabs never learn this process's real
	/// socketId, so this stands in for it on the inter-tab fabric only.
	fn tab_identity(&self) -> Box<str> {
		format!("tab:{}", self.tab_origin).into()
	}

	/// §3 Lifecycle "unloaded when refCount reaches zero": decrement, and on
	/// the last release dispose the binding and tell the server best-effort
	/// (§3: "silent on failure").
	async fn release(&self, doc_id: &DocId) {
		let Some((_entry, remaining)) = self.cache.decrement(doc_id).await else { return };
		if remaining > 0 {
			return;
		}
		let Some(entry) = self.cache.evict(doc_id).await else { return };
		if let Ok(inner) = Arc::try_unwrap(entry).map(AsyncMutex::into_inner) {
			self.doc_binding.dispose(inner.doc);
		}
		let request = ClientRequest::UnsubscribeDoc {
			id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
			doc_id: doc_id.clone(),
		};
		if let Err(err) = self.transport.request(request).await {
			debug!("unsubscribe-doc: best-effort request failed for {}: {}", doc_id, err);
		}
		let _ = self.events_tx.send(ClientEvent::DocUnload { doc_id: doc_id.clone(), ref_count: 0 });
	}
}

// vim: ts=4
