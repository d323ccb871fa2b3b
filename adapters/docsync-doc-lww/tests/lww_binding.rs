//! Integration tests for the last-writer-wins reference `DocBinding`.

use docsync_doc_lww::{LwwBinding, LwwOperation};
use docsync_types::doc_binding::{ChangeSink, DocBinding};
use serde_json::json;

#[test]
fn later_timestamp_wins() {
	let binding = LwwBinding;
	let mut doc = binding.create("note").expect("create doc");

	binding
		.apply_operations(
			&mut doc,
			&[LwwOperation { key: "title".into(), value: json!("first"), timestamp: 1, replica: "a".into() }],
		)
		.expect("apply op 1");
	binding
		.apply_operations(
			&mut doc,
			&[LwwOperation { key: "title".into(), value: json!("second"), timestamp: 2, replica: "b".into() }],
		)
		.expect("apply op 2");

	assert_eq!(doc.get("title"), Some(json!("second")));
}

#[test]
fn tied_timestamp_breaks_on_replica_id() {
	let binding = LwwBinding;
	let mut doc = binding.create("note").expect("create doc");

	binding
		.apply_operations(
			&mut doc,
			&[LwwOperation { key: "title".into(), value: json!("from-b"), timestamp: 5, replica: "b".into() }],
		)
		.expect("apply op from b");
	binding
		.apply_operations(
			&mut doc,
			&[LwwOperation { key: "title".into(), value: json!("from-a"), timestamp: 5, replica: "a".into() }],
		)
		.expect("apply op from a");

	// "b" > "a" lexically, so the first write (replica "b") keeps winning
	// even though the second write arrived later.
	assert_eq!(doc.get("title"), Some(json!("from-b")));
}

#[test]
fn round_trips_through_a_snapshot() {
	let binding = LwwBinding;
	let doc = binding.create("note").expect("create doc");
	doc.set("title", json!("hello"), "a");

	let snapshot = binding.serialize(&doc).expect("serialize");
	let restored = binding.deserialize("note", &snapshot).expect("deserialize");

	assert_eq!(restored.get("title"), Some(json!("hello")));
	assert_eq!(restored.doc_type(), "note");
}

#[test]
fn set_notifies_registered_sinks() {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct CountingSink(Arc<AtomicUsize>);
	impl ChangeSink<LwwOperation> for CountingSink {
		fn on_operations(&self, operations: Vec<LwwOperation>) {
			self.0.fetch_add(operations.len(), Ordering::SeqCst);
		}
	}

	let binding = LwwBinding;
	let doc = binding.create("note").expect("create doc");
	let count = Arc::new(AtomicUsize::new(0));
	binding.on_change(&doc, Arc::new(CountingSink(count.clone())));

	doc.set("a", json!(1), "r1");
	doc.set("b", json!(2), "r1");

	assert_eq!(count.load(Ordering::SeqCst), 2);
}

// vim: ts=4
