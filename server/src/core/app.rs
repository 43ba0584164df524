//! App state type and builder

use std::sync::Arc;
use std::time::Duration;

use dripmail_types::identity_provider_adapter::IdentityProvider;
use dripmail_types::queue_adapter::QueueAdapter;
use dripmail_types::store_adapter::StoreAdapter;
use dripmail_types::transport_adapter::TransportAdapter;

use crate::core::config::Config;
use crate::email::coordinator::{Coordinator, CoordinatorOpts};
use crate::email::worker::{WorkerConfig, WorkerPool};
use crate::maintenance;
use crate::prelude::*;
use crate::rate_limit::{CounterBackend, InMemoryCounterBackend, RateLimiter};
use crate::routes;
use crate::transport::{PreviewTransport, SmtpTransportAdapter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub config: Config,
	pub store: Arc<dyn StoreAdapter>,
	pub queue: Arc<dyn QueueAdapter>,
	pub transport: Arc<dyn TransportAdapter>,
	pub idp: Option<Arc<dyn IdentityProvider>>,
	pub rate_limiter: Arc<RateLimiter>,
	pub coordinator: Coordinator,
	pub worker: Arc<WorkerPool>,
}

pub type App = Arc<AppState>;

#[derive(Default)]
pub struct AppBuilder {
	config: Option<Config>,
	store: Option<Arc<dyn StoreAdapter>>,
	queue: Option<Arc<dyn QueueAdapter>>,
	transport: Option<Arc<dyn TransportAdapter>>,
	idp: Option<Arc<dyn IdentityProvider>>,
	counter_backend: Option<Arc<dyn CounterBackend>>,
}

impl AppBuilder {
	pub fn new() -> Self {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();
		Self::default()
	}

	pub fn config(mut self, config: Config) -> Self {
		self.config = Some(config);
		self
	}

	pub fn store_adapter(mut self, store: Arc<dyn StoreAdapter>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn queue_adapter(mut self, queue: Arc<dyn QueueAdapter>) -> Self {
		self.queue = Some(queue);
		self
	}

	pub fn transport_adapter(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn identity_provider(mut self, idp: Arc<dyn IdentityProvider>) -> Self {
		self.idp = Some(idp);
		self
	}

	pub fn counter_backend(mut self, backend: Arc<dyn CounterBackend>) -> Self {
		self.counter_backend = Some(backend);
		self
	}

	pub async fn run(self) -> ClResult<()> {
		info!("dripmail v{}", VERSION);

		let Some(config) = self.config else {
			error!("FATAL: no configuration provided");
			return Err(Error::Internal("no configuration provided".into()));
		};
		let Some(store) = self.store else {
			error!("FATAL: no store adapter configured");
			return Err(Error::Internal("no store adapter configured".into()));
		};
		let Some(queue) = self.queue else {
			error!("FATAL: no queue adapter configured");
			return Err(Error::Internal("no queue adapter configured".into()));
		};

		// SMTP when configured, preview otherwise
		let transport: Arc<dyn TransportAdapter> = match self.transport {
			Some(transport) => transport,
			None if config.smtp.is_some() => Arc::new(SmtpTransportAdapter::new()),
			None => Arc::new(PreviewTransport::new()),
		};
		let backend: Arc<dyn CounterBackend> = self
			.counter_backend
			.unwrap_or_else(|| Arc::new(InMemoryCounterBackend::new()));

		let rate_limiter = RateLimiter::new(
			backend,
			store.clone(),
			config.global_hourly_limit,
			config.sender_hourly_limit,
		);
		let coordinator = Coordinator::new(
			store.clone(),
			queue.clone(),
			CoordinatorOpts {
				max_retries: config.max_retries,
				initial_backoff: Duration::from_millis(config.initial_retry_delay_ms),
				hour_bucket: config.planner_hour_bucket,
			},
		);
		let worker = WorkerPool::start(
			store.clone(),
			queue.clone(),
			rate_limiter.clone(),
			transport.clone(),
			WorkerConfig {
				concurrency: config.worker_concurrency,
				max_retries: config.max_retries,
				initial_backoff: Duration::from_millis(config.initial_retry_delay_ms),
				default_smtp: config.smtp.clone(),
				..WorkerConfig::default()
			},
		);

		let app: App = Arc::new(AppState {
			config,
			store,
			queue,
			transport,
			idp: self.idp,
			rate_limiter,
			coordinator,
			worker,
		});

		maintenance::start(&app);

		let router = routes::init(app.clone());
		let listener = tokio::net::TcpListener::bind(&*app.config.listen).await?;
		info!("Listening on {}", app.config.listen);

		axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

		// Drain in-flight sends, then close transport and queue handles
		app.worker.shutdown(Duration::from_secs(app.config.shutdown_grace_secs)).await;

		Ok(())
	}
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("shutdown signal received");
}

// vim: ts=4
