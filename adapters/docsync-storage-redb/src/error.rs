//! Adapter-local error type, converted into [`docsync_types::Error`] at the
//! `Transaction`/`ClientStorage` boundary so callers never see a redb type.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	Db(String),
	Io(String),
	Serialization(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Db(msg) => write!(f, "redb error: {msg}"),
			Error::Io(msg) => write!(f, "I/O error: {msg}"),
			Error::Serialization(msg) => write!(f, "serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(err.to_string())
	}
}

impl From<Error> for docsync_types::Error {
	fn from(err: Error) -> Self {
		docsync_types::Error::DatabaseError(err.to_string())
	}
}

// vim: ts=4
