//! Generic web application bootstrap: base routes, JSON catchers, the
//! metrics fairing, optional rate limiting and CORS, and a serve loop that
//! drains background work after a graceful shutdown.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rocket::{Build, Rocket};
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::{ConfigError, ServerConfig};
use crate::cors::TrustedCors;
use crate::metrics::{Metrics, MetricsFairing};
use crate::rate_limit::RateLimit;
use crate::routes::{base_routes, catchers, AppInfo};

/// Seconds an idle keep-alive connection stays open.
const KEEP_ALIVE_SECS: u32 = 60;
/// Seconds in-flight requests get to finish once shutdown starts.
const SHUTDOWN_GRACE_SECS: u32 = 20;

pub struct WebApp {
	config: ServerConfig,
	info: AppInfo,
	metrics: Arc<Metrics>,
	tasks: TaskTracker,
}

impl WebApp {
	pub fn new(config: ServerConfig) -> Self {
		let info = AppInfo::new(config.env);
		Self { config, info, metrics: Arc::new(Metrics::new()), tasks: TaskTracker::new() }
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	pub fn metrics(&self) -> &Arc<Metrics> {
		&self.metrics
	}

	/// Builds the Rocket instance carrying the base routes. Callers mount
	/// their own routes on the result; a scoped limiter only covers those
	/// passed through [`RateLimit::wrap`].
	pub fn build(&self, limit: Option<&RateLimit>, cors: Option<TrustedCors>) -> Result<Rocket<Build>, ConfigError> {
		let addr = self.config.socket_addr()?;
		let figment = rocket::Config::figment()
			.merge(("address", addr.ip()))
			.merge(("port", addr.port()))
			.merge(("keep_alive", KEEP_ALIVE_SECS))
			.merge(("shutdown.grace", SHUTDOWN_GRACE_SECS));

		let routes = match limit {
			Some(limit) => limit.wrap(base_routes()),
			None => base_routes(),
		};

		let mut rocket = rocket::custom(figment)
			.manage(self.info.clone())
			.manage(Arc::clone(&self.metrics))
			.attach(MetricsFairing::new(Arc::clone(&self.metrics)))
			.mount("/", routes)
			.register("/", catchers());
		if let Some(limit) = limit {
			rocket = rocket.attach(limit.clone());
		}
		if let Some(cors) = cors {
			rocket = rocket.attach(cors);
		}
		Ok(rocket)
	}

	/// Runs `task` in the background. Panics are logged rather than
	/// propagated, and `serve` waits for the task before returning.
	pub fn background<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		self.tasks.spawn(async move {
			if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
				error!(panic = %panic_message(panic.as_ref()), "background task panicked");
			}
		});
	}

	/// Serves until SIGINT/SIGTERM, then waits for background tasks.
	pub async fn serve(&self, rocket: Rocket<Build>) -> anyhow::Result<()> {
		info!(env = %self.config.env, addr = %self.config.addr, "starting server");
		let rocket = rocket.launch().await?;
		info!(addr = %rocket.config().address, "completing background tasks");
		self.tasks.close();
		self.tasks.wait().await;
		info!(addr = %self.config.addr, "stopped server");
		Ok(())
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
