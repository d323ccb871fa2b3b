//! Convenience re-exports for downstream crates and within this crate's own
//! modules (mirrors the teacher's `prelude.rs`).

pub use crate::doc_binding::{BindingResult, ChangeSink, DocBinding, FnChangeSink};
pub use crate::error::{ClResult, Error};
pub use crate::ids::{Clock, DeviceId, DocId};
pub use crate::model::{
	OperationBatch, OperationLogEntry, OperationPayload, PresenceMap, SerializedDoc, SnapshotPayload,
	merge_presence_patch,
};
pub use crate::storage::{ClientStorage, ServerStorage, Transaction, TxMode};
pub use serde::{Deserialize, Serialize};

// vim: ts=4
