//! Document identifiers and the logical clock.

use crate::prelude::*;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 26-character lowercase alphabet the `docId` is drawn from: a base36-ish set
/// restricted to lowercase so the id is safe to embed in URLs, paths, and rooms
/// verbatim. Sorts lexicographically by construction (timestamp prefix, then
/// random suffix), satisfying B4 without a shared counter.
const DOC_ID_ALPHABET: [char; 36] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
	'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

pub const DOC_ID_LENGTH: usize = 26;
const TIMESTAMP_CHARS: usize = 10;

/// Generate a new `docId`: a lexicographically sortable 26-character lowercase
/// identifier. The first 10 characters encode the current millisecond timestamp
/// (base36, zero-padded), the remaining 16 are random. Two ids generated in the
/// same millisecond on one process never collide because the random suffix space
/// (36^16) makes a same-call collision practically impossible, and the spec only
/// requires no collision within one process (B4).
pub fn generate_doc_id() -> DocId {
	let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();

	let mut id = String::with_capacity(DOC_ID_LENGTH);
	encode_base36_padded(millis, TIMESTAMP_CHARS, &mut id);

	let mut rng = rand::rng();
	for _ in TIMESTAMP_CHARS..DOC_ID_LENGTH {
		id.push(DOC_ID_ALPHABET[rng.random_range(0..DOC_ID_ALPHABET.len())]);
	}
	DocId(id.into())
}

fn encode_base36_padded(mut value: u128, width: usize, out: &mut String) {
	let mut digits = [0u8; 32];
	let mut n = 0;
	if value == 0 {
		digits[0] = 0;
		n = 1;
	}
	while value > 0 {
		digits[n] = (value % 36) as u8;
		value /= 36;
		n += 1;
	}
	for _ in n..width {
		out.push('0');
	}
	for i in (0..n).rev() {
		out.push(DOC_ID_ALPHABET[digits[i] as usize]);
	}
}

/// A document identifier: a 26-character lowercase string, generated client-side
/// on first creation and never reassigned (§3).
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Box<str>);

impl DocId {
	pub fn new(raw: impl Into<Box<str>>) -> Self {
		Self(raw.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for DocId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for DocId {
	fn from(s: &str) -> Self {
		Self(s.into())
	}
}

impl From<String> for DocId {
	fn from(s: String) -> Self {
		Self(s.into())
	}
}

/// A monotonically non-decreasing per-document sequence number, assigned
/// exclusively by the server at operation-log append time (§3, I2, I3).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clock(pub u64);

impl Clock {
	pub const ZERO: Clock = Clock(0);

	pub fn next_after(prior_max: Clock) -> Clock {
		Clock(prior_max.0 + 1)
	}
}

impl std::fmt::Display for Clock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A stable device identifier, generated once per installation and never
/// rotated (§9 "Global device identifier"). Reuses the same alphabet and
/// generator as `DocId` since both need a collision-resistant opaque token.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub Box<str>);

impl DeviceId {
	pub fn generate() -> Self {
		let doc_id = generate_doc_id();
		Self(doc_id.0)
	}
}

impl std::fmt::Display for DeviceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn doc_id_is_26_chars_lowercase() {
		let id = generate_doc_id();
		assert_eq!(id.0.len(), DOC_ID_LENGTH);
		assert!(id.0.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
	}

	#[test]
	fn doc_id_generation_never_collides_within_one_process() {
		let mut seen = HashSet::new();
		for _ in 0..5000 {
			let id = generate_doc_id();
			assert!(seen.insert(id.0), "B4: generated a duplicate docId");
		}
	}

	#[test]
	fn clock_next_after_is_strictly_increasing() {
		let c0 = Clock::ZERO;
		let c1 = Clock::next_after(c0);
		let c2 = Clock::next_after(c1);
		assert!(c1 > c0);
		assert!(c2 > c1);
	}
}

// vim: ts=4
