//! The wire transport (§4.3, §6.1): a single duplex channel per client.
//! `Transport` abstracts request/response correlation and server-initiated
//! event delivery so the sync engine never depends on a concrete socket
//! library; [`ws::WsTransport`] is the reference implementation over
//! `tokio-tungstenite`. An in-process `Transport` wiring a client directly to
//! an in-memory server lives in the demo binary (§2: "exercises client+server
//! together over an in-process transport"), since it is the one place both
//! crates are linked together.

use crate::prelude::*;
use async_trait::async_trait;
use docsync_types::wire::{ClientRequest, ConnectionEvent, PushEvent, ServerResponse, REQUEST_TIMEOUT};
use tokio::sync::broadcast;

/// One duplex channel to the server. Implementations correlate requests with
/// responses by the `id` field `ClientRequest`/`ServerResponse` already carry.
/// `request` enforces the 5s timeout (§4.3, B3) so callers never need to.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Send `request` and wait for its correlated response, or a `NetworkError`
	/// after [`REQUEST_TIMEOUT`] (B3).
	async fn request(&self, request: ClientRequest) -> ClResult<ServerResponse>;

	/// Server-initiated events (`dirty`, `presence`, `presence-snapshot`) — one
	/// receiver per subscriber; every event is delivered to every subscriber.
	fn events(&self) -> broadcast::Receiver<PushEvent>;

	/// Connection lifecycle (open/close/error).
	fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Wrap a request future with the mandated 5s timeout (§4.3, B3), collapsing
/// a timeout into the same `NetworkError` kind a transport-level failure
/// would produce.
pub async fn with_timeout<T>(fut: impl std::future::Future<Output = ClResult<T>>) -> ClResult<T> {
	match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
		Ok(result) => result,
		Err(_) => Err(Error::NetworkError(format!("request timed out after {REQUEST_TIMEOUT:?}"))),
	}
}

pub mod ws;

// vim: ts=4
