//! redb-backed `ClientStorage` (§4.1, §6.2): one embedded database file per
//! user, two tables per document — a snapshot row and an append-only
//! operation log — plus a tiny per-document sequence counter standing in for
//! the clock the client side of the protocol never actually needs to be
//! authoritative (only the server assigns a real clock; the client only
//! needs *an* order to delete the oldest N batches after a sync).
//!
//! Grounded on `crdt-adapter-redb`'s table layout (binary updates keyed by
//! `doc_id:seq`, JSON metadata in a side table) and its `AdapterConfig`
//! pattern, narrowed from a multi-tenant multi-file cache to the
//! single-file, single-writer-per-process model this engine's client side
//! assumes (§5).

mod error;
pub use error::Error;

use async_trait::async_trait;
use docsync_types::ids::{Clock, DocId};
use docsync_types::model::{OperationBatch, OperationLogEntry, SerializedDoc, SnapshotPayload};
use docsync_types::storage::{ClientStorage, Transaction, TxMode};
use docsync_types::{ClResult, Error as ClError};
use redb::{ReadableDatabase, ReadableTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

mod tables {
	use redb::TableDefinition;

	/// `docId -> json({"snapshot": ..., "clock": u64})`, one row per document.
	pub const TABLE_SNAPSHOTS: TableDefinition<&str, &str> = TableDefinition::new("docsync_snapshots");
	/// `"docId:seq" -> json(operationBatch)`, `seq` zero-padded to 20 digits so
	/// lexical key order matches append order.
	pub const TABLE_OPERATIONS: TableDefinition<&str, &str> = TableDefinition::new("docsync_operations");
	/// `docId -> decimal(nextSeq)`, the append cursor for `TABLE_OPERATIONS`.
	pub const TABLE_OP_SEQ: TableDefinition<&str, &str> = TableDefinition::new("docsync_op_seq");
}
use tables::{TABLE_OPERATIONS, TABLE_OP_SEQ, TABLE_SNAPSHOTS};

const SEQ_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
	/// Path to the redb database file backing this user's documents.
	pub storage_path: PathBuf,
}

impl Default for AdapterConfig {
	fn default() -> Self {
		Self { storage_path: PathBuf::from("./docsync-client.redb") }
	}
}

#[derive(Clone)]
struct SnapshotRow {
	snapshot: SnapshotPayload,
	clock: Clock,
}

/// A `ClientStorage` backed by one redb database file.
pub struct RedbClientStorage {
	db: Arc<redb::Database>,
}

impl RedbClientStorage {
	pub fn open(config: &AdapterConfig) -> ClResult<Self> {
		Self::open_path(&config.storage_path)
	}

	pub fn open_path(path: impl AsRef<Path>) -> ClResult<Self> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(Error::from)?;
		}
		let db = redb::Database::create(path).map_err(|e| Error::Db(e.to_string()))?;

		let tx = db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		let _ = tx.open_table(TABLE_SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
		let _ = tx.open_table(TABLE_OPERATIONS).map_err(|e| Error::Db(e.to_string()))?;
		let _ = tx.open_table(TABLE_OP_SEQ).map_err(|e| Error::Db(e.to_string()))?;
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;

		debug!("opened redb client storage at {:?}", path);
		Ok(Self { db: Arc::new(db) })
	}
}

#[async_trait]
impl ClientStorage for RedbClientStorage {
	async fn transaction(&self, mode: TxMode) -> ClResult<Box<dyn Transaction>> {
		let txn = self.db.begin_write().map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		Ok(Box::new(RedbTransaction { txn: Some(txn), mode }))
	}
}

struct RedbTransaction {
	txn: Option<redb::WriteTransaction>,
	mode: TxMode,
}

impl RedbTransaction {
	fn require_write(&self) -> ClResult<()> {
		if self.mode == TxMode::ReadOnly {
			return Err(ClError::Internal("attempted a write against a read-only transaction".into()));
		}
		Ok(())
	}

	fn txn(&self) -> ClResult<&redb::WriteTransaction> {
		self.txn.as_ref().ok_or_else(|| ClError::Internal("transaction already finished".into()))
	}

	fn op_prefix(doc_id: &DocId) -> String {
		format!("{}:", doc_id.as_str())
	}

	fn op_key(doc_id: &DocId, seq: u64) -> String {
		format!("{}:{:0width$}", doc_id.as_str(), seq, width = SEQ_WIDTH)
	}
}

#[async_trait]
impl Transaction for RedbTransaction {
	async fn get_serialized_doc(&mut self, doc_id: &DocId) -> ClResult<Option<SerializedDoc>> {
		let txn = self.txn()?;
		let table = txn.open_table(TABLE_SNAPSHOTS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		let Some(value) = table.get(doc_id.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))? else {
			return Ok(None);
		};
		let row: SnapshotRowJson = serde_json::from_str(value.value()).map_err(Error::from)?;
		Ok(Some(SerializedDoc { doc_id: doc_id.clone(), snapshot: row.snapshot, clock: Clock(row.clock) }))
	}

	async fn get_operations(
		&mut self,
		doc_id: &DocId,
		since_clock: Option<Clock>,
	) -> ClResult<Vec<OperationLogEntry>> {
		let txn = self.txn()?;
		let table = txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		let prefix = Self::op_prefix(doc_id);
		let range = table.range(prefix.as_str()..).map_err(|e| ClError::from(Error::Db(e.to_string())))?;

		let mut entries = Vec::new();
		for item in range {
			let (key, value) = item.map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let key_str = key.value();
			if !key_str.starts_with(&prefix) {
				break;
			}
			let seq: u64 = key_str[prefix.len()..].parse().unwrap_or(0);
			if since_clock.is_some_and(|since| seq <= since.0) {
				continue;
			}
			let batch: OperationBatch = serde_json::from_str(value.value()).map_err(Error::from)?;
			entries.push(OperationLogEntry { doc_id: doc_id.clone(), batch, clock: Clock(seq) });
		}
		Ok(entries)
	}

	async fn save_operations(&mut self, doc_id: &DocId, batch: OperationBatch) -> ClResult<Clock> {
		self.require_write()?;
		let txn = self.txn()?;

		let seq = {
			let seq_table = txn.open_table(TABLE_OP_SEQ).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let current =
				seq_table.get(doc_id.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			match current {
				Some(value) => value.value().parse::<u64>().unwrap_or(0),
				None => 0,
			}
		};

		{
			let mut seq_table =
				txn.open_table(TABLE_OP_SEQ).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			seq_table
				.insert(doc_id.as_str(), (seq + 1).to_string().as_str())
				.map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}
		{
			let mut ops_table =
				txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let key = Self::op_key(doc_id, seq);
			let value = serde_json::to_string(&batch).map_err(Error::from)?;
			ops_table.insert(key.as_str(), value.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}

		Ok(Clock(seq))
	}

	async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> ClResult<()> {
		self.require_write()?;
		let txn = self.txn()?;
		let prefix = Self::op_prefix(doc_id);

		let keys_to_delete: Vec<String> = {
			let table = txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let range = table.range(prefix.as_str()..).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let mut keys = Vec::with_capacity(count);
			for item in range {
				let (key, _) = item.map_err(|e| ClError::from(Error::Db(e.to_string())))?;
				let key_str = key.value();
				if !key_str.starts_with(&prefix) || keys.len() >= count {
					break;
				}
				keys.push(key_str.to_string());
			}
			keys
		};

		let mut table = txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		for key in keys_to_delete {
			table.remove(key.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}
		Ok(())
	}

	async fn save_serialized_doc(&mut self, doc_id: &DocId, snapshot: SnapshotPayload, clock: Clock) -> ClResult<()> {
		self.require_write()?;
		let txn = self.txn()?;
		let mut table = txn.open_table(TABLE_SNAPSHOTS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		let value = serde_json::to_string(&SnapshotRowJson { snapshot, clock: clock.0 }).map_err(Error::from)?;
		table.insert(doc_id.as_str(), value.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		Ok(())
	}

	async fn delete_doc(&mut self, doc_id: &DocId) -> ClResult<()> {
		self.require_write()?;
		let txn = self.txn()?;
		let prefix = Self::op_prefix(doc_id);

		{
			let mut snapshots = txn.open_table(TABLE_SNAPSHOTS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			snapshots.remove(doc_id.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}
		{
			let mut seq_table = txn.open_table(TABLE_OP_SEQ).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			seq_table.remove(doc_id.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}

		let keys_to_delete: Vec<String> = {
			let table = txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let range = table.range(prefix.as_str()..).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
			let mut keys = Vec::new();
			for item in range {
				let (key, _) = item.map_err(|e| ClError::from(Error::Db(e.to_string())))?;
				let key_str = key.value();
				if !key_str.starts_with(&prefix) {
					break;
				}
				keys.push(key_str.to_string());
			}
			keys
		};
		let mut table = txn.open_table(TABLE_OPERATIONS).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		for key in keys_to_delete {
			table.remove(key.as_str()).map_err(|e| ClError::from(Error::Db(e.to_string())))?;
		}
		Ok(())
	}

	async fn commit(&mut self) -> ClResult<()> {
		match self.txn.take() {
			Some(txn) => txn.commit().map_err(|e| ClError::from(Error::Db(e.to_string()))),
			None => Ok(()),
		}
	}

	async fn rollback(&mut self) -> ClResult<()> {
		self.txn.take();
		Ok(())
	}
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotRowJson {
	snapshot: SnapshotPayload,
	clock: u64,
}

// vim: ts=4
