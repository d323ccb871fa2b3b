//! Server sync handler (§4.8), the authoritative half of the push/pull cycle.
//! Grounded on `crdt_adapter.rs`'s store-and-assign-clock shape and
//! `crdt/websocket.rs`'s handle_crdt_message dispatch, generalized from a
//! fixed Yjs-update payload to the opaque operation-log entries the storage
//! contract defines.

use crate::app::{App, AuthorizeRequest};
use crate::prelude::*;
use crate::session::{ConnectionContext, RoomMessage};
use docsync_types::doc_binding::DocBinding;
use docsync_types::model::{OperationBatch, OperationPayload};
use docsync_types::storage::TxMode;
use docsync_types::wire::{PushEvent, SyncResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast::Sender;

/// Runs the full §4.8 algorithm for one `sync` request and returns the
/// correlated response body. `doc_type` identifies which binding semantics
/// apply for squash; it is not interpreted by the sync handler itself.
#[allow(clippy::too_many_arguments)]
pub async fn handle_sync<B>(
	app: &App<B>,
	ctx: &ConnectionContext,
	room_tx: &Sender<RoomMessage>,
	doc_type: &str,
	doc_id: DocId,
	client_operations: Vec<OperationPayload>,
	client_clock: Clock,
	presence_patch: Option<HashMap<Box<str>, serde_json::Value>>,
) -> ClResult<SyncResult>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	let authorized = (app.authorize)(AuthorizeRequest {
		doc_type: doc_type.into(),
		doc_id: doc_id.clone(),
		user_id: ctx.user_id.clone(),
		context: None,
	})
	.await;
	if !authorized {
		return Err(Error::AuthorizationError(format!(
			"user {} is not authorized to sync {}",
			ctx.user_id, doc_id
		)));
	}

	if let Some(patch) = presence_patch {
		let delta = crate::presence::apply_patch(&doc_id, &ctx.socket_id, patch);
		let _ = room_tx.send(RoomMessage {
			from_socket: ctx.socket_id.clone(),
			from_device: ctx.device_id.clone(),
			event: PushEvent::Presence { doc_id: doc_id.clone(), presence_patch: delta },
		});
	}

	let mut tx = app.storage.transaction(TxMode::ReadWrite).await?;

	let missing_entries = tx.get_operations(&doc_id, Some(client_clock)).await?;
	let snapshot_row = tx.get_serialized_doc(&doc_id).await?;

	let client_sent_ops = !client_operations.is_empty();
	let new_clock = if client_sent_ops {
		tx.save_operations(&doc_id, OperationBatch::new(client_operations)).await?
	} else {
		missing_entries
			.iter()
			.map(|entry| entry.clock)
			.max()
			.or_else(|| snapshot_row.as_ref().map(|row| row.clock))
			.unwrap_or(client_clock)
	};

	tx.commit().await?;

	let missing_ops: Vec<OperationPayload> =
		missing_entries.iter().flat_map(|entry| entry.batch.operations.clone()).collect();

	let serialized_doc = match &snapshot_row {
		Some(row) if row.clock > client_clock => Some(row.snapshot.clone()),
		_ => None,
	};

	if client_sent_ops {
		// Receivers filter by `from_socket`/`from_device` themselves (§4.8
		// step 5: same-device siblings skip this and rely on the inter-tab
		// fabric instead).
		let _ = room_tx.send(RoomMessage {
			from_socket: ctx.socket_id.clone(),
			from_device: ctx.device_id.clone(),
			event: PushEvent::Dirty { doc_id: doc_id.clone() },
		});
	}

	maybe_squash(app, doc_type, &doc_id, &missing_entries).await;

	Ok(SyncResult {
		doc_id,
		operations: if missing_ops.is_empty() { None } else { Some(missing_ops) },
		serialized_doc,
		clock: new_clock,
	})
}

/// Fold the operation log into a fresh snapshot once the backlog the server
/// just handed back reaches [`app.squash_threshold`] entries, then drop the
/// oldest batch (§4.8 step 6, §9). Best-effort: failures are logged, never
/// surfaced to the requesting client.
async fn maybe_squash<B>(
	app: &App<B>,
	doc_type: &str,
	doc_id: &DocId,
	backlog: &[docsync_types::model::OperationLogEntry],
) where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	if backlog.len() < app.squash_threshold {
		return;
	}
	if let Err(err) = squash(app, doc_type, doc_id).await {
		warn!("squash failed for {}: {}", doc_id, err);
	}
}

async fn squash<B>(app: &App<B>, doc_type: &str, doc_id: &DocId) -> ClResult<()>
where
	B: DocBinding,
	B::Operation: Serialize + DeserializeOwned,
	B::Snapshot: Serialize + DeserializeOwned,
{
	let mut tx = app.storage.transaction(TxMode::ReadWrite).await?;

	let Some(row) = tx.get_serialized_doc(doc_id).await? else {
		return Ok(());
	};
	let entries = tx.get_operations(doc_id, Some(row.clock)).await?;
	if entries.is_empty() {
		return Ok(());
	}

	let snapshot: B::Snapshot = serde_json::from_value(row.snapshot)
		.map_err(|e| Error::Internal(format!("squash: undeserializable snapshot: {e}")))?;
	let mut doc = app.doc_binding.deserialize(doc_type, &snapshot).map_err(docsync_types::doc_binding::wrap_binding_error)?;

	let mut operations = Vec::new();
	for entry in &entries {
		for op in &entry.batch.operations {
			let op: B::Operation = serde_json::from_value(op.clone())
				.map_err(|e| Error::Internal(format!("squash: undeserializable operation: {e}")))?;
			operations.push(op);
		}
	}
	app.doc_binding.apply_operations(&mut doc, &operations).map_err(docsync_types::doc_binding::wrap_binding_error)?;

	let new_snapshot = app.doc_binding.serialize(&doc).map_err(docsync_types::doc_binding::wrap_binding_error)?;
	let new_snapshot_value = serde_json::to_value(new_snapshot)?;
	let new_clock = entries.last().map(|e| e.clock).unwrap_or(row.clock);

	tx.save_serialized_doc(doc_id, new_snapshot_value, new_clock).await?;
	tx.delete_operations(doc_id, entries.len()).await?;
	tx.commit().await?;

	app.doc_binding.dispose(doc);
	info!("squashed {} backlog entries for {}", entries.len(), doc_id);
	Ok(())
}

// vim: ts=4
