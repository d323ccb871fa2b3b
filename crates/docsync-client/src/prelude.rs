pub use docsync_types::doc_binding::DocBinding;
pub use docsync_types::error::{ClResult, Error};
pub use docsync_types::ids::{Clock, DeviceId, DocId};

pub use tracing::{debug, error, info, warn};

// vim: ts=4
