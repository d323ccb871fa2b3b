//! End-to-end scenarios from spec §8 exercised against the real
//! [`docsync_client::client::Client`] + [`docsync_client::sync_engine::SyncEngine`]
//! stack, backed by the in-memory fakes in `support`.

mod support;

use docsync_client::client::{SubscribeArgs, SubscribeSink};
use docsync_client::Client;
use docsync_doc_lww::LwwBinding;
use docsync_types::ids::{Clock, DeviceId, DocId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeServer, MemClientStorage, TestSink};

async fn settle() {
	tokio::time::sleep(Duration::from_millis(200)).await;
}

fn unique_user(label: &str) -> String {
	format!("{label}-{}", DeviceId::generate())
}

/// §8 scenario 1 — create-and-push: after the 50ms throttle plus a
/// successful push, the local op log is drained and the snapshot is at the
/// server-assigned clock.
#[tokio::test]
async fn create_and_push_drains_log_and_advances_clock() {
	let storage = Arc::new(MemClientStorage::new());
	let server = FakeServer::new();
	let transport = server.connect();
	let client = Client::new(
		&unique_user("create-and-push"),
		DeviceId::generate(),
		storage.clone(),
		transport,
		Arc::new(LwwBinding),
	);

	let sink = TestSink::new();
	let sub = client.subscribe(SubscribeArgs::CreateNew { doc_type: "test".into() }, sink.clone()).await;
	let entry = sink.entry().expect("create-new resolves synchronously with an entry");

	{
		let guard = entry.lock().await;
		guard.doc.set("title", json!("hello"), "replica-a");
	}

	settle().await;

	assert_eq!(storage.op_log_len(sub.doc_id()).await, 0, "I5: acknowledged ops are removed from the log");
	assert_eq!(storage.snapshot_clock(sub.doc_id()).await, Some(Clock(1)));

	let guard = entry.lock().await;
	assert_eq!(guard.doc.get("title"), Some(json!("hello")));
}

/// §8 scenario 3 / B1 — cross-device dirty: device 1 pushes an op, the
/// server appends it, and device 2 (sharing the doc room) receives `dirty`,
/// triggers a pull with empty outgoing ops (B1: its own log is never
/// touched), and converges to the same clock and content.
#[tokio::test]
async fn cross_device_dirty_triggers_a_pure_pull_that_converges() {
	let server = FakeServer::new();
	let t1 = server.connect();
	let t2 = server.connect();

	let client1 = Client::new(
		&unique_user("dirty-dev1"),
		DeviceId::generate(),
		Arc::new(MemClientStorage::new()),
		t1,
		Arc::new(LwwBinding),
	);
	let storage2 = Arc::new(MemClientStorage::new());
	let client2 = Client::new(&unique_user("dirty-dev2"), DeviceId::generate(), storage2.clone(), t2, Arc::new(LwwBinding));

	let sink1 = TestSink::new();
	let sub1 = client1.subscribe(SubscribeArgs::CreateNew { doc_type: "test".into() }, sink1.clone()).await;
	let doc_id = sub1.doc_id().clone();

	// Device 2 already knows about this docId (e.g. shared out of band) and
	// has created its own empty local replica at the same id.
	let sink2 = TestSink::new();
	let _sub2 = client2
		.subscribe(SubscribeArgs::LoadOrCreate { doc_type: "test".into(), id: doc_id.clone() }, sink2.clone())
		.await;
	let entry2 = sink2.entry().expect("load-or-create resolves with an entry");

	{
		let entry1 = sink1.entry().expect("create-new resolves with an entry");
		let guard = entry1.lock().await;
		guard.doc.set("title", json!("from-device-1"), "dev1");
	}
	settle().await; // device 1 pushes; server notifies device 2 via `dirty`

	assert_eq!(storage2.op_log_len(&doc_id).await, 0, "B1: the pure pull never appends to the local log");
	let guard2 = entry2.lock().await;
	assert_eq!(guard2.doc.get("title"), Some(json!("from-device-1")));
}

/// §8 scenario 5 — offline queue: several mutations land within the 50ms
/// throttle window and are persisted/pushed together in one batch.
#[tokio::test]
async fn offline_queue_coalesces_into_one_push() {
	let storage = Arc::new(MemClientStorage::new());
	let server = FakeServer::new();
	let transport = server.connect();
	let client =
		Client::new(&unique_user("offline-queue"), DeviceId::generate(), storage.clone(), transport, Arc::new(LwwBinding));

	let sink = TestSink::new();
	let sub = client.subscribe(SubscribeArgs::CreateNew { doc_type: "test".into() }, sink.clone()).await;
	let entry = sink.entry().expect("create-new resolves with an entry");

	{
		let guard = entry.lock().await;
		for i in 0..5 {
			guard.doc.set(format!("key-{i}"), json!(i), "replica-a");
		}
	}

	settle().await;

	assert_eq!(storage.op_log_len(sub.doc_id()).await, 0);
	assert_eq!(storage.snapshot_clock(sub.doc_id()).await, Some(Clock(1)), "all 5 ops land in one batch/clock");

	let guard = entry.lock().await;
	for i in 0..5 {
		assert_eq!(guard.doc.get(&format!("key-{i}")), Some(json!(i)));
	}
}

/// R3 / I3 — after a transient failure the push cycle retries immediately
/// and transparently; the engine still converges to one successful push and
/// never issues two requests concurrently (`FakeTransport` would otherwise
/// double-count `clock` if overlapping `sync` calls both appended).
#[tokio::test]
async fn transient_failure_retries_then_converges() {
	let storage = Arc::new(MemClientStorage::new());
	let server = FakeServer::new();
	let transport = server.connect();
	transport.fail_next_n(2);
	let client = Client::new(
		&unique_user("retry"),
		DeviceId::generate(),
		storage.clone(),
		transport.clone(),
		Arc::new(LwwBinding),
	);

	let sink = TestSink::new();
	let sub = client.subscribe(SubscribeArgs::CreateNew { doc_type: "test".into() }, sink.clone()).await;
	let entry = sink.entry().expect("create-new resolves with an entry");

	{
		let guard = entry.lock().await;
		guard.doc.set("k", json!(1), "r");
	}

	settle().await;

	assert_eq!(storage.op_log_len(sub.doc_id()).await, 0, "eventually drains after retries");
	assert_eq!(storage.snapshot_clock(sub.doc_id()).await, Some(Clock(1)));
	assert!(transport.request_count() >= 3, "two failures plus the succeeding attempt");
}

/// B2 — if the server response clock is no greater than the locally stored
/// clock, consolidation is a no-op (modeled here by pushing once, then
/// independently re-triggering a push with nothing new to send).
#[tokio::test]
async fn second_push_with_nothing_new_does_not_regress_clock() {
	let storage = Arc::new(MemClientStorage::new());
	let server = FakeServer::new();
	let transport = server.connect();
	let client =
		Client::new(&unique_user("b2"), DeviceId::generate(), storage.clone(), transport, Arc::new(LwwBinding));

	let sink = TestSink::new();
	let sub = client.subscribe(SubscribeArgs::CreateNew { doc_type: "test".into() }, sink.clone()).await;
	let entry = sink.entry().expect("create-new resolves with an entry");

	{
		let guard = entry.lock().await;
		guard.doc.set("k", json!(1), "r");
	}
	settle().await;
	let clock_after_first = storage.snapshot_clock(sub.doc_id()).await;
	assert_eq!(clock_after_first, Some(Clock(1)));

	// A second mutation pushes again; the clock must strictly advance, never
	// regress, and the first write's field must survive.
	{
		let guard = entry.lock().await;
		guard.doc.set("k2", json!(2), "r");
	}
	settle().await;

	assert_eq!(storage.snapshot_clock(sub.doc_id()).await, Some(Clock(2)));
	let guard = entry.lock().await;
	assert_eq!(guard.doc.get("k"), Some(json!(1)));
	assert_eq!(guard.doc.get("k2"), Some(json!(2)));
}

// vim: ts=4
