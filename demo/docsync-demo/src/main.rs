//! A runnable walkthrough of the docsync stack: one in-process authoritative
//! server, two browser-tab-like clients sharing one device (and so one
//! inter-tab bus and one local database), and a second device for the same
//! user syncing purely through the server. Grounded on the teacher's
//! `basic-server` binary (`DB_DIR`-configured adapters wired into one
//! `AppBuilder`), adapted to also stand up a client-side stack in the same
//! process since this demo has no browser to run the client half in.
//!
//! Run with `cargo run -p docsync-demo` (no toolchain invocation happens as
//! part of building this repo; this file documents the intended entry point).

mod in_process_transport;

use docsync_client::{Client, SubscribeArgs};
use docsync_client::cache::CacheEntry;
use docsync_doc_lww::LwwBinding;
use docsync_server::app::{AppBuilder, AuthContext};
use docsync_storage_redb::{AdapterConfig as RedbConfig, RedbClientStorage};
use docsync_storage_sqlite::{AdapterConfig as SqliteConfig, SqliteServerStorage};
use docsync_types::ids::DeviceId;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::oneshot;
use tracing::info;

const DOC_TYPE: &str = "note";

/// A `SubscribeSink` that resolves a single oneshot once `subscribe` settles,
/// for driving the client facade from plain `await`ing code instead of a
/// long-lived UI callback.
struct OneShotSink<B: docsync_client::prelude::DocBinding> {
	tx: AsyncMutex<Option<oneshot::Sender<Result<Option<Arc<AsyncMutex<CacheEntry<B>>>>, docsync_types::Error>>>>,
}

impl<B: docsync_client::prelude::DocBinding> OneShotSink<B> {
	fn new() -> (Arc<Self>, oneshot::Receiver<Result<Option<Arc<AsyncMutex<CacheEntry<B>>>>, docsync_types::Error>>) {
		let (tx, rx) = oneshot::channel();
		(Arc::new(Self { tx: AsyncMutex::new(Some(tx)) }), rx)
	}
}

impl<B: docsync_client::prelude::DocBinding> docsync_client::client::SubscribeSink<B> for OneShotSink<B> {
	fn on_success(&self, _doc_id: docsync_types::ids::DocId, entry: Option<Arc<AsyncMutex<CacheEntry<B>>>>) {
		if let Ok(mut slot) = self.tx.try_lock() {
			if let Some(tx) = slot.take() {
				let _ = tx.send(Ok(entry));
			}
		}
	}

	fn on_error(&self, err: docsync_types::Error) {
		if let Ok(mut slot) = self.tx.try_lock() {
			if let Some(tx) = slot.take() {
				let _ = tx.send(Err(err));
			}
		}
	}
}

async fn subscribe_and_wait(
	client: &Arc<Client<LwwBinding>>,
	args: SubscribeArgs,
) -> (docsync_types::ids::DocId, Arc<AsyncMutex<CacheEntry<LwwBinding>>>) {
	let (sink, rx) = OneShotSink::new();
	let subscription = client.subscribe(args, sink).await;
	let doc_id = subscription.doc_id().clone();
	let entry = rx
		.await
		.expect("subscribe sink dropped without resolving")
		.expect("subscribe failed")
		.expect("document unexpectedly absent");
	// Keep the subscription alive for the lifetime of the demo's doc handle;
	// a real caller stores this and calls `unsubscribe()` when the view goes away.
	std::mem::forget(subscription);
	(doc_id, entry)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let db_dir = PathBuf::from(std::env::var("DB_DIR").unwrap_or_else(|_| "./docsync-demo-data".to_string()));
	tokio::fs::create_dir_all(&db_dir).await?;

	let server_storage =
		SqliteServerStorage::open(SqliteConfig { database_path: db_dir.join("server.sqlite3") }).await?;

	let app = AppBuilder::<LwwBinding>::new()
		.storage(Arc::new(server_storage))
		.doc_binding(Arc::new(LwwBinding))
		.doc_type(DOC_TYPE)
		.authenticate(|_token| async move { Some(AuthContext { user_id: "alice".into(), context: None }) })
		.build()
		.await?;

	// Two tabs of the same browser: same user, same device, same local
	// database, two independent socket connections to the server.
	let tab_storage: Arc<dyn docsync_types::storage::ClientStorage> = Arc::new(
		RedbClientStorage::open(&RedbConfig { storage_path: db_dir.join("alice-device1.redb") })?,
	);
	let device1 = DeviceId::generate();

	let tab_a_transport = in_process_transport::InProcessTransport::connect(app.clone(), "alice", device1.clone());
	let tab_a = Client::new("alice", device1.clone(), tab_storage.clone(), tab_a_transport, Arc::new(LwwBinding));

	let tab_b_transport = in_process_transport::InProcessTransport::connect(app.clone(), "alice", device1.clone());
	let tab_b = Client::new("alice", device1, tab_storage, tab_b_transport, Arc::new(LwwBinding));

	// A second device for the same user: its own local database, reached
	// only through the server's authoritative log.
	let device2_storage: Arc<dyn docsync_types::storage::ClientStorage> = Arc::new(
		RedbClientStorage::open(&RedbConfig { storage_path: db_dir.join("alice-device2.redb") })?,
	);
	let device2 = DeviceId::generate();
	let device2_transport = in_process_transport::InProcessTransport::connect(app.clone(), "alice", device2.clone());
	let device2_client = Client::new("alice", device2, device2_storage, device2_transport, Arc::new(LwwBinding));

	info!("creating a new note on tab A");
	let (doc_id, tab_a_doc) =
		subscribe_and_wait(&tab_a, SubscribeArgs::CreateNew { doc_type: DOC_TYPE.into() }).await;
	{
		let entry = tab_a_doc.lock().await;
		entry.doc.set("title", json!("Grocery list"), "tab-a");
	}
	info!("tab A wrote title for {doc_id}");

	// Give the 50ms mutation throttle and the push/pull round trip time to
	// settle before the other participants subscribe.
	tokio::time::sleep(std::time::Duration::from_millis(250)).await;

	info!("tab B (same device, same storage) subscribing to {doc_id}");
	let (_, tab_b_doc) =
		subscribe_and_wait(&tab_b, SubscribeArgs::Load { doc_type: DOC_TYPE.into(), id: doc_id.clone() }).await;
	info!("tab B sees title (via local database, same inter-tab broadcast): {:?}", tab_b_doc.lock().await.doc.get("title"));

	// Device 2 learns the `docId` out of band (e.g. a shared link) and has no
	// local copy of it. A bare `Load` would resolve `None` forever: the push
	// cycle only consolidates a server pull once a snapshot row exists
	// locally, and that row is only seeded on a local mutation. So device 2
	// claims the document with its own write, which both seeds that row and
	// drives the push/pull round trip that folds tab A's title in alongside it.
	info!("device 2 (separate storage) claiming {doc_id} with its own write");
	let (_, device2_doc) =
		subscribe_and_wait(&device2_client, SubscribeArgs::LoadOrCreate { doc_type: DOC_TYPE.into(), id: doc_id.clone() })
			.await;
	{
		let entry = device2_doc.lock().await;
		entry.doc.set("claimed_by", json!("device-2"), "device-2");
	}
	tokio::time::sleep(std::time::Duration::from_millis(250)).await;
	info!(
		"device 2 sees title (via server pull) and its own claim: {:?} / {:?}",
		device2_doc.lock().await.doc.get("title"),
		device2_doc.lock().await.doc.get("claimed_by"),
	);

	Ok(())
}

// vim: ts=4
