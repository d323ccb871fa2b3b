//! The storage provider contract (§4.1, §6.2): two flavors — client and server —
//! exposing the same transactional shape. Grounded on the teacher's
//! `RtdbAdapter`/`Transaction` split (begin a transaction, read/write through its
//! context, commit or roll back), generalized from path-addressed JSON documents
//! to the sync engine's per-`docId` snapshot + operation-log pair.

use crate::error::ClResult;
use crate::ids::{Clock, DocId};
use crate::model::{OperationBatch, OperationLogEntry, SerializedDoc};
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxMode {
	ReadOnly,
	ReadWrite,
}

/// An open transaction. All reads observe this transaction's own uncommitted
/// writes (read-your-own-writes), matching the teacher's `Transaction::get`
/// semantics. Callers must call `commit` to persist effects; dropping without
/// committing — or calling `rollback` — discards them.
#[async_trait]
pub trait Transaction: Send + Sync {
	/// Load the current snapshot for `docId`, if any.
	async fn get_serialized_doc(&mut self, doc_id: &DocId) -> ClResult<Option<SerializedDoc>>;

	/// Load the operation log for `docId`, optionally only entries whose batch
	/// clock is strictly greater than `since_clock` (server form). Entries are
	/// returned ordered by clock; each carries the clock the server assigned
	/// to its batch so callers can compute "the current authoritative clock"
	/// without a separate round-trip.
	async fn get_operations(
		&mut self,
		doc_id: &DocId,
		since_clock: Option<Clock>,
	) -> ClResult<Vec<OperationLogEntry>>;

	/// Append one batch to the operation log. On the server this assigns and
	/// returns the next clock (strictly greater than any prior for this
	/// `docId`); on the client the returned clock is unused and irrelevant —
	/// client implementations may return `Clock::ZERO`.
	async fn save_operations(&mut self, doc_id: &DocId, batch: OperationBatch) -> ClResult<Clock>;

	/// Delete the `count` oldest batches from `docId`'s operation log.
	async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> ClResult<()>;

	/// Upsert the serialized snapshot for `docId` at `clock`.
	async fn save_serialized_doc(
		&mut self,
		doc_id: &DocId,
		snapshot: crate::model::SnapshotPayload,
		clock: Clock,
	) -> ClResult<()>;

	/// Drop the snapshot and the entire operation log for `docId` (wire
	/// `delete-doc`, §4.3). Idempotent: deleting an already-absent `docId`
	/// is not an error.
	async fn delete_doc(&mut self, doc_id: &DocId) -> ClResult<()>;

	/// Commit the transaction, applying all changes atomically.
	async fn commit(&mut self) -> ClResult<()>;

	/// Roll back the transaction, discarding all changes.
	async fn rollback(&mut self) -> ClResult<()>;
}

/// Client-side storage provider: an embedded key-value store backing
/// `documents(docId, snapshot, clock)` and `operations(docId, clock, opsBatch)`
/// (§6.2), shared across tabs of the same user.
#[async_trait]
pub trait ClientStorage: Send + Sync {
	/// Begin a new transaction. `readwrite` transactions serialize against any
	/// other open `readwrite` transaction for the same `docId` (§4.1 Isolation).
	async fn transaction(&self, mode: TxMode) -> ClResult<Box<dyn Transaction>>;
}

/// Server-side storage provider: authoritative operation log and snapshot store,
/// one instance shared by every connection the process serves.
#[async_trait]
pub trait ServerStorage: Send + Sync {
	async fn transaction(&self, mode: TxMode) -> ClResult<Box<dyn Transaction>>;
}

// vim: ts=4
