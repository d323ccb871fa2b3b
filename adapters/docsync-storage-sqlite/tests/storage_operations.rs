//! Integration tests for the SQLite-backed server storage.

use docsync_storage_sqlite::{AdapterConfig, SqliteServerStorage};
use docsync_types::ids::{Clock, DocId};
use docsync_types::model::OperationBatch;
use docsync_types::storage::{ServerStorage, Transaction, TxMode};
use serde_json::json;

async fn open_temp() -> (SqliteServerStorage, tempfile::TempDir) {
	let dir = tempfile::tempdir().expect("create temp dir");
	let path = dir.path().join("server.sqlite3");
	let storage = SqliteServerStorage::open(AdapterConfig { database_path: path }).await.expect("open sqlite storage");
	(storage, dir)
}

#[tokio::test]
async fn assigns_increasing_clocks_per_doc() {
	let (storage, _dir) = open_temp().await;
	let doc_id = DocId::from("doc-clocks");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	let c1 = tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 1})])).await.expect("save op 1");
	let c2 = tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 2})])).await.expect("save op 2");
	tx.commit().await.expect("commit");

	assert_eq!(c1, Clock(1));
	assert_eq!(c2, Clock(2));
}

#[tokio::test]
async fn reads_back_operations_since_a_clock() {
	let (storage, _dir) = open_temp().await;
	let doc_id = DocId::from("doc-ops");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 1})])).await.expect("save op 1");
	let second = tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 2})])).await.expect("save op 2");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let entries = tx.get_operations(&doc_id, Some(Clock(0))).await.expect("get operations");
	assert_eq!(entries.len(), 2);

	let entries = tx.get_operations(&doc_id, Some(Clock(second.0 - 1))).await.expect("get operations");
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].clock, second);
}

#[tokio::test]
async fn round_trips_a_snapshot_and_clock_continues_from_it() {
	let (storage, _dir) = open_temp().await;
	let doc_id = DocId::from("doc-snap");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_serialized_doc(&doc_id, json!({"text": "hello"}), Clock(5)).await.expect("save snapshot");
	let next = tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 1})])).await.expect("save op");
	tx.commit().await.expect("commit");
	assert_eq!(next, Clock(6));

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let doc = tx.get_serialized_doc(&doc_id).await.expect("get snapshot").expect("snapshot present");
	assert_eq!(doc.snapshot, json!({"text": "hello"}));
	assert_eq!(doc.clock, Clock(5));
}

#[tokio::test]
async fn delete_doc_clears_snapshot_and_operations() {
	let (storage, _dir) = open_temp().await;
	let doc_id = DocId::from("doc-delete");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_serialized_doc(&doc_id, json!({"text": "x"}), Clock(1)).await.expect("save snapshot");
	tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": 1})])).await.expect("save op");
	tx.delete_doc(&doc_id).await.expect("delete doc");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	assert!(tx.get_serialized_doc(&doc_id).await.expect("get snapshot").is_none());
	assert!(tx.get_operations(&doc_id, None).await.expect("get operations").is_empty());
}

#[tokio::test]
async fn deletes_the_oldest_batches_first() {
	let (storage, _dir) = open_temp().await;
	let doc_id = DocId::from("doc-trim");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	for i in 0..5 {
		tx.save_operations(&doc_id, OperationBatch::new(vec![json!({"op": i})])).await.expect("save op");
	}
	tx.delete_operations(&doc_id, 3).await.expect("delete oldest");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let remaining = tx.get_operations(&doc_id, None).await.expect("get operations");
	assert_eq!(remaining.len(), 2);
	assert_eq!(remaining[0].clock, Clock(4));
	assert_eq!(remaining[1].clock, Clock(5));
}

// vim: ts=4
