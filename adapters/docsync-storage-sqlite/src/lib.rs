//! SQLite-backed [`ServerStorage`]: the authoritative operation log and
//! snapshot store a docsync server process owns.
//!
//! Grounded on the teacher's `MetaAdapterSqlite` split-pool design: a
//! single-connection write pool serializes all mutations while a small
//! read-only pool serves concurrent reads without blocking on the writer.
//! Clock assignment happens here, not in the sync engine: the server is the
//! sole authority for a `docId`'s clock (§3, §4.1), so `save_operations`
//! computes `MAX(clock) + 1` under the write transaction before inserting.

mod error;

pub use error::Error;

use async_trait::async_trait;
use docsync_types::error::ClResult;
use docsync_types::ids::{Clock, DocId};
use docsync_types::model::{OperationBatch, OperationLogEntry, SerializedDoc, SnapshotPayload};
use docsync_types::storage::{ServerStorage, Transaction, TxMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the server-side SQLite database file lives.
#[derive(Clone, Debug)]
pub struct AdapterConfig {
	pub database_path: PathBuf,
}

impl Default for AdapterConfig {
	fn default() -> Self {
		Self { database_path: PathBuf::from("docsync-server.sqlite3") }
	}
}

/// The authoritative server store. `write_pool` holds exactly one connection
/// so every mutation is trivially serialized; `read_pool` serves concurrent
/// readers against the same file without contending for the writer's lock.
pub struct SqliteServerStorage {
	write_pool: SqlitePool,
	read_pool: SqlitePool,
}

impl SqliteServerStorage {
	pub async fn open(config: AdapterConfig) -> ClResult<Self> {
		Self::open_path(&config.database_path).await
	}

	pub async fn open_path(path: impl AsRef<Path>) -> ClResult<Self> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}

		let write_opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
			.map_err(|err| docsync_types::Error::DatabaseError(err.to_string()))?
			.create_if_missing(true)
			.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
		let write_pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(write_opts)
			.await
			.map_err(Error::from)?;

		let read_opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
			.map_err(|err| docsync_types::Error::DatabaseError(err.to_string()))?
			.read_only(true);
		let read_pool = SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(read_opts)
			.await
			.map_err(Error::from)?;

		let storage = Self { write_pool, read_pool };
		storage.migrate().await?;
		Ok(storage)
	}

	async fn migrate(&self) -> ClResult<()> {
		sqlx::query(
			"CREATE TABLE IF NOT EXISTS snapshots (\
				doc_id TEXT PRIMARY KEY, \
				snapshot TEXT NOT NULL, \
				clock INTEGER NOT NULL\
			)",
		)
		.execute(&self.write_pool)
		.await
		.map_err(Error::from)?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS operations (\
				doc_id TEXT NOT NULL, \
				clock INTEGER NOT NULL, \
				batch TEXT NOT NULL, \
				PRIMARY KEY (doc_id, clock)\
			)",
		)
		.execute(&self.write_pool)
		.await
		.map_err(Error::from)?;

		Ok(())
	}
}

#[async_trait]
impl ServerStorage for SqliteServerStorage {
	async fn transaction(&self, mode: TxMode) -> ClResult<Box<dyn Transaction>> {
		let pool = match mode {
			TxMode::ReadWrite => &self.write_pool,
			TxMode::ReadOnly => &self.read_pool,
		};
		let tx = pool.begin().await.map_err(Error::from)?;
		Ok(Box::new(SqliteTransaction { tx: Some(tx), mode }))
	}
}

struct SqliteTransaction {
	tx: Option<sqlx::Transaction<'static, Sqlite>>,
	mode: TxMode,
}

impl SqliteTransaction {
	fn require_write(&self) -> ClResult<()> {
		if self.mode == TxMode::ReadOnly {
			return Err(docsync_types::Error::Internal(
				"attempted a write on a read-only transaction".into(),
			));
		}
		Ok(())
	}

	fn tx_mut(&mut self) -> ClResult<&mut sqlx::Transaction<'static, Sqlite>> {
		self.tx
			.as_mut()
			.ok_or_else(|| docsync_types::Error::Internal("transaction already finished".into()))
	}
}

#[async_trait]
impl Transaction for SqliteTransaction {
	async fn get_serialized_doc(&mut self, doc_id: &DocId) -> ClResult<Option<SerializedDoc>> {
		let tx = self.tx_mut()?;
		let row = sqlx::query("SELECT snapshot, clock FROM snapshots WHERE doc_id = ?")
			.bind(doc_id.as_str())
			.fetch_optional(&mut **tx)
			.await
			.map_err(Error::from)?;

		let Some(row) = row else { return Ok(None) };
		let snapshot_text: String = row.try_get("snapshot").map_err(Error::from)?;
		let clock: i64 = row.try_get("clock").map_err(Error::from)?;
		let snapshot: SnapshotPayload = serde_json::from_str(&snapshot_text).map_err(Error::from)?;
		Ok(Some(SerializedDoc { doc_id: doc_id.clone(), snapshot, clock: Clock(clock as u64) }))
	}

	async fn get_operations(
		&mut self,
		doc_id: &DocId,
		since_clock: Option<Clock>,
	) -> ClResult<Vec<OperationLogEntry>> {
		let tx = self.tx_mut()?;
		let since = since_clock.map_or(-1, |clock| clock.0 as i64);
		let rows = sqlx::query(
			"SELECT clock, batch FROM operations WHERE doc_id = ? AND clock > ? ORDER BY clock ASC",
		)
		.bind(doc_id.as_str())
		.bind(since)
		.fetch_all(&mut **tx)
		.await
		.map_err(Error::from)?;

		rows.into_iter()
			.map(|row| {
				let clock: i64 = row.try_get("clock").map_err(Error::from)?;
				let batch_text: String = row.try_get("batch").map_err(Error::from)?;
				let batch: OperationBatch = serde_json::from_str(&batch_text).map_err(Error::from)?;
				Ok(OperationLogEntry { doc_id: doc_id.clone(), batch, clock: Clock(clock as u64) })
			})
			.collect()
	}

	async fn save_operations(&mut self, doc_id: &DocId, batch: OperationBatch) -> ClResult<Clock> {
		self.require_write()?;
		let tx = self.tx_mut()?;

		let max_op: Option<i64> =
			sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(clock) FROM operations WHERE doc_id = ?")
				.bind(doc_id.as_str())
				.fetch_one(&mut **tx)
				.await
				.map_err(Error::from)?;
		let max_snapshot: Option<i64> =
			sqlx::query_scalar::<_, i64>("SELECT clock FROM snapshots WHERE doc_id = ?")
				.bind(doc_id.as_str())
				.fetch_optional(&mut **tx)
				.await
				.map_err(Error::from)?;
		let prior_max = max_op.into_iter().chain(max_snapshot).max().unwrap_or(0);
		let next_clock = Clock::next_after(Clock(prior_max as u64));

		let batch_text = serde_json::to_string(&batch).map_err(Error::from)?;
		sqlx::query("INSERT INTO operations (doc_id, clock, batch) VALUES (?, ?, ?)")
			.bind(doc_id.as_str())
			.bind(next_clock.0 as i64)
			.bind(batch_text)
			.execute(&mut **tx)
			.await
			.map_err(Error::from)?;

		Ok(next_clock)
	}

	async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> ClResult<()> {
		self.require_write()?;
		let tx = self.tx_mut()?;
		sqlx::query(
			"DELETE FROM operations WHERE rowid IN (\
				SELECT rowid FROM operations WHERE doc_id = ? ORDER BY clock ASC LIMIT ?\
			)",
		)
		.bind(doc_id.as_str())
		.bind(count as i64)
		.execute(&mut **tx)
		.await
		.map_err(Error::from)?;
		Ok(())
	}

	async fn save_serialized_doc(
		&mut self,
		doc_id: &DocId,
		snapshot: SnapshotPayload,
		clock: Clock,
	) -> ClResult<()> {
		self.require_write()?;
		let tx = self.tx_mut()?;
		let snapshot_text = serde_json::to_string(&snapshot).map_err(Error::from)?;
		sqlx::query(
			"INSERT INTO snapshots (doc_id, snapshot, clock) VALUES (?, ?, ?) \
				ON CONFLICT(doc_id) DO UPDATE SET snapshot = excluded.snapshot, clock = excluded.clock",
		)
		.bind(doc_id.as_str())
		.bind(snapshot_text)
		.bind(clock.0 as i64)
		.execute(&mut **tx)
		.await
		.map_err(Error::from)?;
		Ok(())
	}

	async fn delete_doc(&mut self, doc_id: &DocId) -> ClResult<()> {
		self.require_write()?;
		let tx = self.tx_mut()?;
		sqlx::query("DELETE FROM snapshots WHERE doc_id = ?")
			.bind(doc_id.as_str())
			.execute(&mut **tx)
			.await
			.map_err(Error::from)?;
		sqlx::query("DELETE FROM operations WHERE doc_id = ?")
			.bind(doc_id.as_str())
			.execute(&mut **tx)
			.await
			.map_err(Error::from)?;
		Ok(())
	}

	async fn commit(&mut self) -> ClResult<()> {
		if let Some(tx) = self.tx.take() {
			tx.commit().await.map_err(Error::from)?;
		}
		Ok(())
	}

	async fn rollback(&mut self) -> ClResult<()> {
		if let Some(tx) = self.tx.take() {
			tx.rollback().await.map_err(Error::from)?;
		}
		Ok(())
	}
}

// vim: ts=4
