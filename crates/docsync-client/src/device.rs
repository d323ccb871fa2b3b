//! Stable device identifier (§9 "Global device identifier"): generated once
//! per installation and never rotated. Persisted through a tiny
//! caller-supplied store rather than `ClientStorage` itself, since the
//! storage contract is per-`docId` (§4.1) and a device id is process-wide.

use crate::prelude::*;
use async_trait::async_trait;

/// Where the device id is persisted across process restarts. A minimal seam
/// so callers can back this with a file, the same embedded database used for
/// documents, or an OS keychain, without the engine caring which.
#[async_trait]
pub trait DeviceIdStore: Send + Sync {
	async fn load(&self) -> ClResult<Option<DeviceId>>;
	async fn save(&self, id: &DeviceId) -> ClResult<()>;
}

/// Initialized on first connect, never rotated (§9).
pub async fn get_or_create(store: &dyn DeviceIdStore) -> ClResult<DeviceId> {
	if let Some(existing) = store.load().await? {
		return Ok(existing);
	}
	let generated = DeviceId::generate();
	store.save(&generated).await?;
	Ok(generated)
}

/// An in-memory store, useful for tests and for callers that intentionally
/// want a fresh device id every process start.
pub struct EphemeralDeviceIdStore(tokio::sync::Mutex<Option<DeviceId>>);

impl Default for EphemeralDeviceIdStore {
	fn default() -> Self {
		Self(tokio::sync::Mutex::new(None))
	}
}

#[async_trait]
impl DeviceIdStore for EphemeralDeviceIdStore {
	async fn load(&self) -> ClResult<Option<DeviceId>> {
		Ok(self.0.lock().await.clone())
	}

	async fn save(&self, id: &DeviceId) -> ClResult<()> {
		*self.0.lock().await = Some(id.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn get_or_create_persists_across_calls() {
		let store = EphemeralDeviceIdStore::default();
		let first = get_or_create(&store).await.unwrap();
		let second = get_or_create(&store).await.unwrap();
		assert_eq!(first, second);
	}
}

// vim: ts=4
