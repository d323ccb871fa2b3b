//! Integration tests for the redb-backed client storage.

use docsync_storage_redb::RedbClientStorage;
use docsync_types::ids::{Clock, DocId};
use docsync_types::model::OperationBatch;
use docsync_types::storage::{ClientStorage, Transaction, TxMode};
use serde_json::json;

fn temp_storage() -> (RedbClientStorage, tempfile::TempDir) {
	let dir = tempfile::tempdir().expect("create temp dir");
	let path = dir.path().join("client.redb");
	(RedbClientStorage::open_path(path).expect("open redb storage"), dir)
}

#[tokio::test]
async fn round_trips_a_snapshot() {
	let (storage, _dir) = temp_storage();
	let doc_id = DocId::from("doc-redb-test-aaaaaaaaaaaaaaa");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_serialized_doc(&doc_id, json!({"text": "hi"}), Clock(5)).await.expect("save snapshot");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let row = tx.get_serialized_doc(&doc_id).await.expect("get snapshot").expect("snapshot present");
	assert_eq!(row.snapshot, json!({"text": "hi"}));
	assert_eq!(row.clock, Clock(5));
}

#[tokio::test]
async fn appends_and_deletes_operations_in_order() {
	let (storage, _dir) = temp_storage();
	let doc_id = DocId::from("doc-redb-test-bbbbbbbbbbbbbbb");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_operations(&doc_id, OperationBatch::new(vec![json!(1)])).await.expect("save op 1");
	tx.save_operations(&doc_id, OperationBatch::new(vec![json!(2)])).await.expect("save op 2");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let entries = tx.get_operations(&doc_id, None).await.expect("get operations");
	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].batch.operations, vec![json!(1)]);
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.delete_operations(&doc_id, 1).await.expect("delete oldest");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	let remaining = tx.get_operations(&doc_id, None).await.expect("get operations");
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].batch.operations, vec![json!(2)]);
}

#[tokio::test]
async fn delete_doc_clears_snapshot_and_operations() {
	let (storage, _dir) = temp_storage();
	let doc_id = DocId::from("doc-redb-test-ccccccccccccccc");

	let mut tx = storage.transaction(TxMode::ReadWrite).await.expect("begin tx");
	tx.save_serialized_doc(&doc_id, json!({}), Clock(1)).await.expect("save snapshot");
	tx.save_operations(&doc_id, OperationBatch::new(vec![json!(1)])).await.expect("save op");
	tx.delete_doc(&doc_id).await.expect("delete doc");
	tx.commit().await.expect("commit");

	let mut tx = storage.transaction(TxMode::ReadOnly).await.expect("begin tx");
	assert!(tx.get_serialized_doc(&doc_id).await.expect("get snapshot").is_none());
	assert!(tx.get_operations(&doc_id, None).await.expect("get operations").is_empty());
}

// vim: ts=4
