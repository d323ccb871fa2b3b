//! A last-writer-wins map: the reference [`DocBinding`] docsync ships for
//! tests and demos. Each field is independently resolved by
//! `(timestamp, replicaId)` — the same two-part tie-break the teacher's
//! conflict-resolution helpers use for merging concurrent writes to one key,
//! generalized here from a single JSON document to docsync's
//! create/serialize/apply_operations contract (§4.2).
//!
//! This binding is intentionally simple: one flat namespace of keys, no
//! nested structure, no move/delete-vs-write races beyond last-writer-wins.
//! Richer CRDTs (sequence types, nested maps) are out of scope for the
//! reference implementation; bring your own `DocBinding` for those.

use docsync_types::doc_binding::{ChangeSink, DocBinding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One resolved field: the value currently in the map plus the write that
/// produced it, kept so a later merge can compare against it.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
	value: Value,
	timestamp: u64,
	replica: Box<str>,
}

impl Entry {
	/// `true` if `other` should replace `self` under last-writer-wins: a
	/// strictly later timestamp wins outright; a tied timestamp is broken by
	/// comparing replica ids so every replica resolves the tie identically.
	fn superseded_by(&self, other: &Entry) -> bool {
		(other.timestamp, &other.replica) > (self.timestamp, &self.replica)
	}
}

/// One write to a single key, the unit [`DocBinding::apply_operations`]
/// replays and [`LwwDocument::set`] emits to its change sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LwwOperation {
	pub key: Box<str>,
	pub value: Value,
	pub timestamp: u64,
	pub replica: Box<str>,
}

/// The persisted form of an [`LwwDocument`]: every field at its
/// currently-resolved value, plus the write that produced it so snapshots
/// can be folded against further operations without losing tie-break
/// information (R1: deserializing a snapshot must behave like the original).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LwwSnapshot {
	doc_type: Box<str>,
	fields: HashMap<Box<str>, Entry>,
}

/// A live last-writer-wins map. Field reads/writes go through `get`/`set`;
/// `set` is the "application mutates the document through its own API" path
/// (§4.2) that notifies any registered change sink. The engine's own
/// `apply_operations` calls never go through `set` and so never notify.
pub struct LwwDocument {
	doc_type: Box<str>,
	fields: Mutex<HashMap<Box<str>, Entry>>,
	sinks: Mutex<Vec<std::sync::Arc<dyn ChangeSink<LwwOperation>>>>,
}

impl LwwDocument {
	fn new(doc_type: Box<str>) -> Self {
		Self { doc_type, fields: Mutex::new(HashMap::new()), sinks: Mutex::new(Vec::new()) }
	}

	pub fn doc_type(&self) -> &str {
		&self.doc_type
	}

	/// The current value of `key`, if any replica has ever written it.
	pub fn get(&self, key: &str) -> Option<Value> {
		self.fields.lock().ok()?.get(key).map(|entry| entry.value.clone())
	}

	/// All currently-resolved keys and values, in no particular order.
	pub fn entries(&self) -> Vec<(Box<str>, Value)> {
		let Ok(fields) = self.fields.lock() else { return Vec::new() };
		fields.iter().map(|(key, entry)| (key.clone(), entry.value.clone())).collect()
	}

	/// Write `key` as `replica` at the current wall-clock time, merge it
	/// locally, and notify every registered change sink with the resulting
	/// operation. This is the application-facing mutation entry point; the
	/// sync engine never calls it directly.
	pub fn set(&self, key: impl Into<Box<str>>, value: Value, replica: impl Into<Box<str>>) {
		let op = LwwOperation {
			key: key.into(),
			value,
			timestamp: now_millis(),
			replica: replica.into(),
		};
		self.merge_one(&op);

		let sinks = self.sinks.lock().map(|guard| guard.clone()).unwrap_or_default();
		for sink in &sinks {
			sink.on_operations(vec![op.clone()]);
		}
	}

	fn merge_one(&self, op: &LwwOperation) {
		let Ok(mut fields) = self.fields.lock() else { return };
		let candidate = Entry { value: op.value.clone(), timestamp: op.timestamp, replica: op.replica.clone() };
		match fields.get(&op.key) {
			Some(existing) if !existing.superseded_by(&candidate) => {}
			_ => {
				fields.insert(op.key.clone(), candidate);
			}
		}
	}
}

fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Clone, Debug)]
pub enum Error {
	Serialization(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Serialization(msg) => write!(f, "lww serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

/// The `DocBinding` itself. Stateless: every piece of per-document state
/// lives on `LwwDocument`, so one `LwwBinding` is shared across every
/// document a client has open, matching how the engine hands a single
/// `Arc<B>` to every subscription.
#[derive(Clone, Copy, Debug, Default)]
pub struct LwwBinding;

impl DocBinding for LwwBinding {
	type Document = LwwDocument;
	type Snapshot = LwwSnapshot;
	type Operation = LwwOperation;
	type Error = Error;

	fn create(&self, doc_type: &str) -> Result<Self::Document, Self::Error> {
		Ok(LwwDocument::new(doc_type.into()))
	}

	fn serialize(&self, doc: &Self::Document) -> Result<Self::Snapshot, Self::Error> {
		let fields = doc.fields.lock().map(|guard| guard.clone()).unwrap_or_default();
		Ok(LwwSnapshot { doc_type: doc.doc_type.clone(), fields })
	}

	fn deserialize(&self, doc_type: &str, snapshot: &Self::Snapshot) -> Result<Self::Document, Self::Error> {
		Ok(LwwDocument {
			doc_type: doc_type.into(),
			fields: Mutex::new(snapshot.fields.clone()),
			sinks: Mutex::new(Vec::new()),
		})
	}

	fn apply_operations(
		&self,
		doc: &mut Self::Document,
		operations: &[Self::Operation],
	) -> Result<(), Self::Error> {
		for op in operations {
			doc.merge_one(op);
		}
		Ok(())
	}

	fn on_change(&self, doc: &Self::Document, sink: std::sync::Arc<dyn ChangeSink<Self::Operation>>) {
		if let Ok(mut sinks) = doc.sinks.lock() {
			sinks.push(sink);
		}
	}

	fn dispose(&self, doc: Self::Document) {
		drop(doc);
	}
}

// vim: ts=4
