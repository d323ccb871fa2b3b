//! The `DocBinding` contract (§4.2): the capability set the sync engine uses to
//! treat documents as opaque values. Generic over three associated types
//! (`Document`, `Snapshot`, `Operation`) per the Design Note in spec §9 — concrete
//! CRDTs implement this trait once and the engine never looks inside.

use crate::error::ClResult;

/// Sink that receives operations emitted by a live document (§4.2 `onChange`).
/// A `DocBinding` implementation calls this whenever the application mutates the
/// document through its own API — never when the engine applies operations on
/// the binding's behalf (that path is reentrancy-guarded by the caller, §5).
pub trait ChangeSink<Operation>: Send + Sync {
	fn on_operations(&self, operations: Vec<Operation>);
}

/// A boxed sink built from a plain closure, for call sites that don't need a
/// named type.
pub struct FnChangeSink<Operation> {
	f: Box<dyn Fn(Vec<Operation>) + Send + Sync>,
}

impl<Operation> FnChangeSink<Operation> {
	pub fn new(f: impl Fn(Vec<Operation>) + Send + Sync + 'static) -> Self {
		Self { f: Box::new(f) }
	}
}

impl<Operation> ChangeSink<Operation> for FnChangeSink<Operation> {
	fn on_operations(&self, operations: Vec<Operation>) {
		(self.f)(operations);
	}
}

/// Document semantics the sync engine delegates to a pluggable CRDT or other
/// convergent replicated type. Contract (§4.2):
///
/// - `deserialize(serialize(d))` is behaviorally indistinguishable from `d` (R1).
/// - For any ordered sequence of operation payloads, applying them to two
///   replicas that started identical yields identical serializations (R2).
/// - `apply_operations` invoked by the engine must not cause the binding's own
///   change sink to fire; the engine enforces this with a reentrancy guard (§5)
///   but a correct binding must not fire its sink from inside `apply_operations`
///   regardless.
///
/// All methods are synchronous: create/serialize/deserialize/apply are
/// specified as pure, non-I/O operations (§4.2), so there is no suspension
/// point to model with `async fn` here — unlike the storage traits below.
pub trait DocBinding: Send + Sync + 'static {
	type Document: Send + Sync;
	type Snapshot: Send + Sync;
	type Operation: Send + Sync + Clone;
	type Error: std::error::Error + Send + Sync + 'static;

	/// Create a new document of `doc_type`, optionally with a caller-supplied id.
	/// Pure — must not perform I/O.
	fn create(&self, doc_type: &str) -> Result<Self::Document, Self::Error>;

	/// Serialize a document into a persistable snapshot.
	fn serialize(&self, doc: &Self::Document) -> Result<Self::Snapshot, Self::Error>;

	/// Reconstruct a document from a previously produced snapshot.
	fn deserialize(&self, doc_type: &str, snapshot: &Self::Snapshot) -> Result<Self::Document, Self::Error>;

	/// Apply operations to a document in place. Must not emit a change event.
	fn apply_operations(
		&self,
		doc: &mut Self::Document,
		operations: &[Self::Operation],
	) -> Result<(), Self::Error>;

	/// Register a sink that receives operations as the application mutates
	/// `doc` through its own API.
	fn on_change(&self, doc: &Self::Document, sink: std::sync::Arc<dyn ChangeSink<Self::Operation>>);

	/// Release any resources (subscriptions, buffers) held for `doc`.
	fn dispose(&self, doc: Self::Document);
}

/// Translate a `DocBinding::Error` into the engine's error taxonomy. Kept
/// separate from `DocBinding` itself since bindings are generic over error types
/// that do not necessarily know about `docsync_types::Error`.
pub fn wrap_binding_error<E: std::fmt::Display>(err: E) -> crate::error::Error {
	crate::error::Error::Internal(format!("DocBinding error: {err}"))
}

pub type BindingResult<T> = ClResult<T>;

// vim: ts=4
