//! Server configuration and app state (§6.4). Grounded on the teacher's
//! `AppBuilder` (`core/app.rs`): a fluent builder validates mandatory fields
//! at `run()` time, logs a startup banner, and hands back a cloneable
//! `Arc`-wrapped state shared by every connection.

use crate::prelude::*;
use crate::session::SocketMemberships;
use docsync_types::doc_binding::DocBinding;
use docsync_types::events::ServerEvent;
use docsync_types::storage::ServerStorage;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What the authenticator resolves a handshake token to (§6.4).
#[derive(Clone, Debug)]
pub struct AuthContext {
	pub user_id: Box<str>,
	pub context: Option<Value>,
}

/// The authorization decision's input: the doc type being synced, the raw
/// request payload, and the caller's resolved identity (§6.4).
#[derive(Clone, Debug)]
pub struct AuthorizeRequest {
	pub doc_type: Box<str>,
	pub doc_id: DocId,
	pub user_id: Box<str>,
	pub context: Option<Value>,
}

type AuthenticateFn =
	Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<AuthContext>> + Send>> + Send + Sync>;
type AuthorizeFn =
	Arc<dyn Fn(AuthorizeRequest) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;
type InitCallback<B> =
	Box<dyn FnOnce(App<B>) -> Pin<Box<dyn Future<Output = ClResult<()>> + Send>> + Send>;

/// Shared server state. `B` is the single `DocBinding` implementation this
/// server instance uses to fold operations into snapshots during squash
/// (§4.8 step 6) — the sync engine otherwise never looks inside it.
pub struct AppState<B> {
	pub storage: Arc<dyn ServerStorage>,
	pub doc_binding: Arc<B>,
	/// The single document type this server instance's `DocBinding` handles
	/// (§6.4: the server is configured with one `docBinding` factory, not a
	/// per-type registry — the wire protocol's `sync` request carries no
	/// `doc_type` field).
	pub doc_type: Box<str>,
	pub authenticate: AuthenticateFn,
	pub authorize: AuthorizeFn,
	pub memberships: SocketMemberships,
	pub squash_threshold: usize,
	/// Operator-facing event taxonomy (§4.10): `clientConnect`,
	/// `clientDisconnect`, `syncRequest`.
	pub events: broadcast::Sender<ServerEvent>,
}

pub type App<B> = Arc<AppState<B>>;

pub struct AppBuilder<B> {
	port: u16,
	storage: Option<Arc<dyn ServerStorage>>,
	doc_binding: Option<Arc<B>>,
	doc_type: Box<str>,
	authenticate: Option<AuthenticateFn>,
	authorize: Option<AuthorizeFn>,
	squash_threshold: usize,
	on_init: Vec<InitCallback<B>>,
	event_capacity: usize,
}

impl<B: DocBinding> Default for AppBuilder<B> {
	fn default() -> Self {
		Self::new()
	}
}

impl<B: DocBinding> AppBuilder<B> {
	pub fn new() -> Self {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();
		AppBuilder {
			port: 8080,
			storage: None,
			doc_binding: None,
			doc_type: "default".into(),
			authenticate: None,
			authorize: None,
			squash_threshold: docsync_types::wire::SQUASH_THRESHOLD,
			on_init: Vec::new(),
			event_capacity: 1024,
		}
	}

	pub fn port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	pub fn storage(mut self, storage: Arc<dyn ServerStorage>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn doc_binding(mut self, doc_binding: Arc<B>) -> Self {
		self.doc_binding = Some(doc_binding);
		self
	}

	/// The document type name passed to `DocBinding::create`/`deserialize`
	/// (e.g. during squash). Defaults to `"default"`.
	pub fn doc_type(mut self, doc_type: impl Into<Box<str>>) -> Self {
		self.doc_type = doc_type.into();
		self
	}

	/// Capacity of the operator event broadcast channel. Defaults to 1024.
	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	pub fn authenticate<F, Fut>(mut self, f: F) -> Self
	where
		F: Fn(String) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Option<AuthContext>> + Send + 'static,
	{
		self.authenticate = Some(Arc::new(move |token| Box::pin(f(token))));
		self
	}

	/// Defaults to allow-all when never called (§6.4 `authorize?`).
	pub fn authorize<F, Fut>(mut self, f: F) -> Self
	where
		F: Fn(AuthorizeRequest) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = bool> + Send + 'static,
	{
		self.authorize = Some(Arc::new(move |req| Box::pin(f(req))));
		self
	}

	pub fn squash_threshold(mut self, threshold: usize) -> Self {
		self.squash_threshold = threshold;
		self
	}

	/// Register an async initialization callback that runs after the state is
	/// built but before the caller starts serving connections.
	pub fn on_init<F, Fut>(mut self, f: F) -> Self
	where
		F: FnOnce(App<B>) -> Fut + Send + 'static,
		Fut: Future<Output = ClResult<()>> + Send + 'static,
	{
		self.on_init.push(Box::new(move |app| Box::pin(f(app))));
		self
	}

	/// Validate mandatory fields and build the shared state, running any
	/// registered `on_init` callbacks. The caller is responsible for actually
	/// binding a listener and serving the axum router (`crate::websocket::router`).
	pub async fn build(self) -> ClResult<App<B>> {
		info!("  ___           ____");
		info!(" |   \\___  ___ / ___| _   _ _ __   ___");
		info!(" | |) / _ \\/ __\\___ \\| | | | '_ \\ / __|");
		info!(" |  __/ (_) \\__ \\___) | |_| | | | | (__");
		info!(" |_|   \\___/|___/____/ \\__, |_| |_|\\___|");
		info!("                       |___/  V{}", VERSION);
		info!("");

		let Some(storage) = self.storage else {
			error!("FATAL: no storage provider configured");
			return Err(Error::Internal("no storage provider configured".into()));
		};
		let Some(doc_binding) = self.doc_binding else {
			error!("FATAL: no DocBinding configured");
			return Err(Error::Internal("no DocBinding configured".into()));
		};
		let Some(authenticate) = self.authenticate else {
			error!("FATAL: no authenticate callback configured");
			return Err(Error::Internal("no authenticate callback configured".into()));
		};
		let authorize: AuthorizeFn = self.authorize.unwrap_or_else(|| Arc::new(|_req| Box::pin(async { true })));
		let (events, _rx) = broadcast::channel(self.event_capacity);

		let state = Arc::new(AppState {
			storage,
			doc_binding,
			doc_type: self.doc_type,
			authenticate,
			authorize,
			memberships: SocketMemberships::new(),
			squash_threshold: self.squash_threshold,
			events,
		});

		info!("docsync-server listening on port {}", self.port);

		for init in self.on_init {
			init(state.clone()).await?;
		}

		Ok(state)
	}
}

// vim: ts=4
