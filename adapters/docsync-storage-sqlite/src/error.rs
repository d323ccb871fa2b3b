//! Adapter-local error type, converted into [`docsync_types::Error`] at the
//! `Transaction`/`ServerStorage` boundary so callers never see a `sqlx` type.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	Db(String),
	NotFound,
	Serialization(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Db(msg) => write!(f, "sqlite error: {msg}"),
			Error::NotFound => write!(f, "row not found"),
			Error::Serialization(msg) => write!(f, "serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::RowNotFound => Error::NotFound,
			other => Error::Db(other.to_string()),
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<Error> for docsync_types::Error {
	fn from(err: Error) -> Self {
		match err {
			Error::NotFound => docsync_types::Error::NotFound,
			other => docsync_types::Error::DatabaseError(other.to_string()),
		}
	}
}

// vim: ts=4
