//! Error handling subsystem. Implements the engine-wide `Error` enum.
//!
//! Kinds mirror the taxonomy the sync engine is specified against: a `NetworkError`
//! and an `AuthorizationError` are retried, a `ValidationError` surfaces without
//! retrying the local log, a `DatabaseError` propagates as a load/sync failure, and
//! an `AuthenticationError` is terminal for the connection.

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Wire timeout or transport closed mid-request.
	NetworkError(String),
	/// Server rejected the caller-supplied authorization policy.
	AuthorizationError(String),
	/// Server or client rejected a malformed payload.
	ValidationError(String),
	/// Local or server storage transaction failed.
	DatabaseError(String),
	/// Connection-time credential rejection; not retried by the engine.
	AuthenticationError(String),
	/// The requested document type has no registered `DocBinding`.
	UnknownDocType(String),
	/// A `docId` was not found in local cache nor local storage.
	NotFound,
	/// An internal invariant was violated; surfaced for debugging.
	Internal(String),
	Io(std::io::Error),
	Json(serde_json::Error),
}

impl Error {
	/// The wire-level error kind, per the `sync` response error taxonomy (§4.3).
	pub fn kind(&self) -> &'static str {
		match self {
			Error::NetworkError(_) => "NetworkError",
			Error::AuthorizationError(_) => "AuthorizationError",
			Error::ValidationError(_) => "ValidationError",
			Error::DatabaseError(_) => "DatabaseError",
			Error::AuthenticationError(_) => "AuthenticationError",
			Error::UnknownDocType(_) => "UnknownDocType",
			Error::NotFound => "NotFound",
			Error::Internal(_) => "Internal",
			Error::Io(_) => "Io",
			Error::Json(_) => "Json",
		}
	}

	/// Whether the client sync engine should retry the push cycle immediately.
	///
	/// Authorization errors are retried per the design note in spec §9: the
	/// distillation preserves this as an open question rather than mandating a
	/// policy, so we retry identically to a transient network error.
	pub fn is_retriable(&self) -> bool {
		matches!(
			self,
			Error::NetworkError(_)
				| Error::AuthorizationError(_)
				| Error::ValidationError(_)
				| Error::DatabaseError(_)
		)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Self::Json(err)
	}
}

// vim: ts=4
