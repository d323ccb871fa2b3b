//! Client doc cache (§4.4): a ref-counted in-memory table of live documents.
//! Grounded on the teacher's `DashMap`-backed document-instance cache in
//! `crdt-adapter-redb::CrdtAdapterRedb` (one entry per live document, built
//! lazily, torn down on last release), generalized from an LRU-with-idle-timeout
//! policy to the spec's strict ref-count-reaches-zero eviction (§3 invariant 4)
//! and narrowed to the single-writer-per-process model §5 mandates for the
//! client (a `tokio::sync::Mutex` rather than a lock-free map).

use crate::prelude::*;
use docsync_types::doc_binding::DocBinding;
use docsync_types::model::PresenceMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, broadcast};

/// A live document plus the bookkeeping the cache needs to decide when to
/// evict it (§3 "Cache entry").
pub struct CacheEntry<B: DocBinding> {
	pub doc: B::Document,
	pub doc_type: Box<str>,
	pub ref_count: usize,
	pub presence: PresenceMap,
	pub presence_subscribers: Vec<Arc<dyn crate::presence::PresenceSink>>,
	/// Flipped on before the engine itself calls `DocBinding::apply_operations`
	/// (consolidate fold, fan-out, inter-tab receive) and restored after, so
	/// the registered change sink can refuse to re-queue operations the
	/// engine is replaying on the binding's behalf (§4.2, §5).
	pub applying: Arc<std::sync::atomic::AtomicBool>,
}

impl<B: DocBinding> CacheEntry<B> {
	fn new(doc: B::Document, doc_type: Box<str>) -> Self {
		Self {
			doc,
			doc_type,
			ref_count: 1,
			presence: PresenceMap::new(),
			presence_subscribers: Vec::new(),
			applying: Arc::new(std::sync::atomic::AtomicBool::new(false)),
		}
	}
}

/// RAII guard that flips [`CacheEntry::applying`] on for its lifetime.
pub struct ApplyGuard(Arc<std::sync::atomic::AtomicBool>);

impl ApplyGuard {
	pub fn enter(flag: Arc<std::sync::atomic::AtomicBool>) -> Self {
		flag.store(true, std::sync::atomic::Ordering::SeqCst);
		Self(flag)
	}
}

impl Drop for ApplyGuard {
	fn drop(&mut self) {
		self.0.store(false, std::sync::atomic::Ordering::SeqCst);
	}
}

/// Outcome broadcast to every subscriber racing a single in-flight load
/// (§4.4 Concurrency: "simultaneous subscribes to the same pending docId
/// share one load promise").
#[derive(Clone, Debug)]
pub enum LoadOutcome {
	Ready,
	Absent,
	Failed(Arc<str>),
}

struct Inner<B: DocBinding> {
	entries: HashMap<DocId, Arc<AsyncMutex<CacheEntry<B>>>>,
	pending: HashMap<DocId, broadcast::Sender<LoadOutcome>>,
}

impl<B: DocBinding> Default for Inner<B> {
	fn default() -> Self {
		Self { entries: HashMap::new(), pending: HashMap::new() }
	}
}

/// The ref-counted document table. One instance per [`crate::Client`].
pub struct DocCache<B: DocBinding> {
	inner: AsyncMutex<Inner<B>>,
}

impl<B: DocBinding> Default for DocCache<B> {
	fn default() -> Self {
		Self { inner: AsyncMutex::new(Inner::default()) }
	}
}

/// What a caller should do after calling [`DocCache::begin_subscribe`].
pub enum SubscribeLead<B: DocBinding> {
	/// Already resident; `ref_count` was incremented before returning.
	CacheHit(Arc<AsyncMutex<CacheEntry<B>>>),
	/// A load for this `docId` is already in flight; await the receiver, then
	/// call [`DocCache::join_after_load`].
	JoinPending(broadcast::Receiver<LoadOutcome>),
	/// No entry and nothing pending: the caller is now responsible for
	/// performing the load and calling [`DocCache::complete_load`] or
	/// [`DocCache::fail_load`].
	MustLoad,
}

impl<B: DocBinding> DocCache<B> {
	/// Decide how `doc_id` should be resolved, racing concurrent subscribers
	/// against the same pending load (§4.4 Concurrency).
	pub async fn begin_subscribe(&self, doc_id: &DocId) -> SubscribeLead<B> {
		let mut inner = self.inner.lock().await;
		if let Some(entry) = inner.entries.get(doc_id) {
			entry.lock().await.ref_count += 1;
			return SubscribeLead::CacheHit(entry.clone());
		}
		if let Some(tx) = inner.pending.get(doc_id) {
			return SubscribeLead::JoinPending(tx.subscribe());
		}
		let (tx, _rx) = broadcast::channel(16);
		inner.pending.insert(doc_id.clone(), tx);
		SubscribeLead::MustLoad
	}

	/// After a `JoinPending` receiver resolves to [`LoadOutcome::Ready`], fetch
	/// the now-resident entry and bump its ref-count — the caller is now a
	/// subscriber too (§4.4: "both increment refCount, both receive the same
	/// doc instance").
	pub async fn join_after_load(&self, doc_id: &DocId) -> Option<Arc<AsyncMutex<CacheEntry<B>>>> {
		let mut inner = self.inner.lock().await;
		if let Some(entry) = inner.entries.get(doc_id) {
			entry.lock().await.ref_count += 1;
			return Some(entry.clone());
		}
		None
	}

	/// The `MustLoad` caller succeeded: insert the freshly loaded document with
	/// `ref_count = 1` and wake every subscriber that joined the pending load.
	pub async fn complete_load(&self, doc_id: &DocId, doc: B::Document, doc_type: Box<str>) -> Arc<AsyncMutex<CacheEntry<B>>> {
		let mut inner = self.inner.lock().await;
		let entry = Arc::new(AsyncMutex::new(CacheEntry::new(doc, doc_type)));
		inner.entries.insert(doc_id.clone(), entry.clone());
		if let Some(tx) = inner.pending.remove(doc_id) {
			let _ = tx.send(LoadOutcome::Ready);
		}
		entry
	}

	/// The load resolved to "nothing at that id" (e.g. `{type, id}` with no
	/// existing document). No cache entry is created (§4.4 error policy: "a
	/// failed load... leaves no cache entry" — the same holds for a clean miss).
	pub async fn mark_absent(&self, doc_id: &DocId) {
		let mut inner = self.inner.lock().await;
		if let Some(tx) = inner.pending.remove(doc_id) {
			let _ = tx.send(LoadOutcome::Absent);
		}
	}

	/// The `MustLoad` caller's load failed: wake every joined subscriber with
	/// the failure and leave no cache entry (§4.4 error policy).
	pub async fn fail_load(&self, doc_id: &DocId, message: impl Into<Arc<str>>) {
		let mut inner = self.inner.lock().await;
		if let Some(tx) = inner.pending.remove(doc_id) {
			let _ = tx.send(LoadOutcome::Failed(message.into()));
		}
	}

	/// Decrement `doc_id`'s ref-count. Returns the entry and the post-decrement
	/// count so the caller can decide whether to evict (§3 invariant 4).
	pub async fn decrement(&self, doc_id: &DocId) -> Option<(Arc<AsyncMutex<CacheEntry<B>>>, usize)> {
		let inner = self.inner.lock().await;
		let entry = inner.entries.get(doc_id)?.clone();
		drop(inner);
		let count = {
			let mut guard = entry.lock().await;
			guard.ref_count = guard.ref_count.saturating_sub(1);
			guard.ref_count
		};
		Some((entry, count))
	}

	/// Drop the cache entry for `doc_id` (called once ref-count has reached
	/// zero and any in-flight load for it has resolved, §3 invariant 4).
	pub async fn evict(&self, doc_id: &DocId) -> Option<Arc<AsyncMutex<CacheEntry<B>>>> {
		let mut inner = self.inner.lock().await;
		inner.entries.remove(doc_id)
	}

	pub async fn get(&self, doc_id: &DocId) -> Option<Arc<AsyncMutex<CacheEntry<B>>>> {
		self.inner.lock().await.entries.get(doc_id).cloned()
	}

	pub async fn contains(&self, doc_id: &DocId) -> bool {
		self.inner.lock().await.entries.contains_key(doc_id)
	}
}

// vim: ts=4
