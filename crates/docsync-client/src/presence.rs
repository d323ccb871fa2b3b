//! Client-side presence fabric (§4.7): debounced `setPresence`, additive +
//! tombstone merge into the cache's per-doc presence map, and the subscriber
//! notification that replaces the teacher's callback-registration with a
//! plain trait object (mirroring [`docsync_types::doc_binding::ChangeSink`]'s
//! `FnChangeSink` shape). Grounded on
//! `cloudillo_rtdb::merge::shallow_merge`'s null-deletes-key rule, reused
//! here via [`docsync_types::model::merge_presence_patch`].

use crate::prelude::*;
use docsync_types::model::{PresenceMap, merge_presence_patch};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Presence debounce window (§4.5 "Debouncing (presence)").
pub const PRESENCE_DEBOUNCE: Duration = Duration::from_millis(50);

/// Notified whenever a doc's merged presence map changes, whether from a
/// local `setPresence`, an inter-tab patch, or a server `presence` event.
pub trait PresenceSink: Send + Sync {
	fn on_presence(&self, doc_id: &DocId, presence: &PresenceMap);
}

/// A boxed sink built from a closure, for call sites with no named type.
pub struct FnPresenceSink<F>(F);

impl<F> FnPresenceSink<F>
where
	F: Fn(&DocId, &PresenceMap) + Send + Sync,
{
	pub fn new(f: F) -> Self {
		Self(f)
	}
}

impl<F> PresenceSink for FnPresenceSink<F>
where
	F: Fn(&DocId, &PresenceMap) + Send + Sync,
{
	fn on_presence(&self, doc_id: &DocId, presence: &PresenceMap) {
		(self.0)(doc_id, presence);
	}
}

/// Merge an incoming patch (from the wire, a peer tab, or a local
/// `setPresence` call) into `target`, applying tombstone-on-null semantics,
/// then notify every subscriber with the post-merge map (§3 invariant 6 is
/// the server's job — see `docsync-server::presence` — this side just merges
/// whatever it is handed).
pub fn merge_and_notify(
	doc_id: &DocId,
	target: &mut PresenceMap,
	patch: &HashMap<Box<str>, serde_json::Value>,
	subscribers: &[Arc<dyn PresenceSink>],
) {
	merge_presence_patch(target, patch);
	for sub in subscribers {
		sub.on_presence(doc_id, target);
	}
}

/// Debounces `setPresence` calls per `docId`, keeping only the latest value
/// (§4.7: "never persisted to local storage"). Each call replaces any
/// pending timer for the same `docId` rather than stacking timers, matching
/// the mutation throttle's "keep only the latest" framing but without the
/// coalescing queue a mutation throttle needs (presence has no history to
/// preserve — only the most recent value is ever meaningful).
#[derive(Default)]
pub struct PresenceDebouncer {
	pending: AsyncMutex<HashMap<DocId, JoinHandle<()>>>,
}

impl PresenceDebouncer {
	/// Schedule `flush` to run after [`PRESENCE_DEBOUNCE`], cancelling any
	/// timer already pending for `doc_id`.
	pub async fn schedule<F>(&self, doc_id: DocId, flush: F)
	where
		F: std::future::Future<Output = ()> + Send + 'static,
	{
		let mut pending = self.pending.lock().await;
		if let Some(existing) = pending.remove(&doc_id) {
			existing.abort();
		}
		let handle = tokio::spawn(async move {
			tokio::time::sleep(PRESENCE_DEBOUNCE).await;
			flush.await;
		});
		pending.insert(doc_id, handle);
	}

	/// Drop bookkeeping for a timer that already fired (idempotent; a timer
	/// that was replaced by a newer `schedule` call was already aborted).
	pub async fn clear(&self, doc_id: &DocId) {
		self.pending.lock().await.remove(doc_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingSink(Arc<AtomicUsize>);
	impl PresenceSink for CountingSink {
		fn on_presence(&self, _doc_id: &DocId, _presence: &PresenceMap) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[test]
	fn merge_and_notify_tombstones_and_fans_out() {
		let doc_id = DocId::from("doc-presence-client-test-aaaa");
		let mut map = PresenceMap::new();
		map.insert("peer-a".into(), json!({"cursor": 1}));

		let calls = Arc::new(AtomicUsize::new(0));
		let subs: Vec<Arc<dyn PresenceSink>> = vec![Arc::new(CountingSink(calls.clone()))];

		let mut patch = HashMap::new();
		patch.insert("peer-a".into(), serde_json::Value::Null);
		merge_and_notify(&doc_id, &mut map, &patch, &subs);

		assert!(map.is_empty());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn schedule_cancels_superseded_timer() {
		let debouncer = PresenceDebouncer::default();
		let doc_id = DocId::from("doc-presence-client-test-bbbb");
		let fired = Arc::new(AtomicUsize::new(0));

		let f1 = fired.clone();
		debouncer
			.schedule(doc_id.clone(), async move {
				f1.fetch_add(1, Ordering::SeqCst);
			})
			.await;

		let f2 = fired.clone();
		debouncer
			.schedule(doc_id.clone(), async move {
				f2.fetch_add(10, Ordering::SeqCst);
			})
			.await;

		tokio::time::advance(PRESENCE_DEBOUNCE * 2).await;
		tokio::task::yield_now().await;

		assert_eq!(fired.load(Ordering::SeqCst), 10);
	}
}

// vim: ts=4
