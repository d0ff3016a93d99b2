//! Per-client rate limiting.
//!
//! Every client identifier gets its own token bucket (capacity `burst`,
//! refilled at `rps` tokens per second). Buckets live in a registry behind
//! one mutex; a sweeper task drops clients that have gone quiet so churn
//! in client addresses cannot grow the registry without bound.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use rocket::fairing::{self, Fairing, Info, Kind};
use rocket::http::uri::Origin;
use rocket::http::Method;
use rocket::route::{self, Handler};
use rocket::{Build, Data, Orbit, Request, Rocket, Route};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client_ip::{ClientResolver, ForwardedResolver};
use crate::config::LimiterConfig;
use crate::errors::ApiError;

/// How often idle clients are swept from the registry.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Clients unseen for longer than this are dropped by the sweep.
pub const STALE_AFTER: Duration = Duration::from_secs(180);
/// Shared bucket for requests whose client address cannot be resolved.
pub const FALLBACK_CLIENT_KEY: &str = "unresolved";

#[derive(Debug, Error, PartialEq)]
pub enum LimiterError {
	#[error("rate limiter rps must be a positive, finite number (got {0})")]
	InvalidRate(f64),
	#[error("rate limiter burst must be at least 1")]
	ZeroBurst,
}

type Bucket<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

struct ClientState<C: Clock> {
	bucket: Bucket<C>,
	last_seen: C::Instant,
}

/// Fastest refill a quota can express: one token per nanosecond.
const MIN_PERIOD: Duration = Duration::from_nanos(1);
/// Slowest refill accepted: one token per day.
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Builds the token-bucket quota described by `config`. Rates outside one
/// token per nanosecond to one per day are clamped to that range.
pub fn quota(config: &LimiterConfig) -> Result<Quota, LimiterError> {
	if !config.rps.is_finite() || config.rps <= 0.0 {
		return Err(LimiterError::InvalidRate(config.rps));
	}
	let burst = NonZeroU32::new(config.burst).ok_or(LimiterError::ZeroBurst)?;
	let period = Duration::try_from_secs_f64(1.0 / config.rps)
		.unwrap_or(MAX_PERIOD)
		.clamp(MIN_PERIOD, MAX_PERIOD);
	let quota = Quota::with_period(period).ok_or(LimiterError::InvalidRate(config.rps))?;
	Ok(quota.allow_burst(burst))
}

/// Registry of per-client token buckets.
pub struct ClientLimiter<C: Clock + Clone = DefaultClock> {
	clients: Mutex<HashMap<String, ClientState<C>>>,
	quota: Quota,
	active: bool,
	clock: C,
	sweep_interval: Duration,
	stale_after: Duration,
}

impl ClientLimiter<DefaultClock> {
	pub fn new(config: &LimiterConfig) -> Result<Self, LimiterError> {
		Self::with_clock(config, DefaultClock::default())
	}
}

impl<C: Clock + Clone> ClientLimiter<C> {
	pub fn with_clock(config: &LimiterConfig, clock: C) -> Result<Self, LimiterError> {
		Ok(Self {
			clients: Mutex::new(HashMap::new()),
			quota: quota(config)?,
			active: config.active,
			clock,
			sweep_interval: SWEEP_INTERVAL,
			stale_after: STALE_AFTER,
		})
	}

	pub fn with_sweep(mut self, interval: Duration, stale_after: Duration) -> Self {
		self.sweep_interval = interval;
		self.stale_after = stale_after;
		self
	}

	pub fn is_active(&self) -> bool {
		self.active
	}

	/// Decides whether `client` may make a request right now, consuming a
	/// token if so. Never blocks beyond the registry lock.
	pub fn allow(&self, client: &str) -> bool {
		if !self.active {
			return true;
		}
		let now = self.clock.now();
		let mut clients = self.clients.lock();
		let state = clients.entry(client.to_owned()).or_insert_with(|| ClientState {
			bucket: RateLimiter::direct_with_clock(self.quota, self.clock.clone()),
			last_seen: now,
		});
		state.last_seen = state.last_seen.max(now);
		state.bucket.check().is_ok()
	}

	/// Removes clients idle for longer than the staleness window and
	/// returns how many were dropped.
	pub fn sweep(&self) -> usize {
		let now = self.clock.now();
		let mut clients = self.clients.lock();
		let before = clients.len();
		clients.retain(|_, state| Duration::from(now.duration_since(state.last_seen)) <= self.stale_after);
		before - clients.len()
	}

	/// Number of clients currently tracked.
	pub fn len(&self) -> usize {
		self.clients.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn contains(&self, client: &str) -> bool {
		self.clients.lock().contains_key(client)
	}
}

impl<C> ClientLimiter<C>
where
	C: Clock + Clone + Send + Sync + 'static,
	C::Instant: Send + Sync,
{
	/// Sweeps on every interval tick until `shutdown` resolves.
	pub fn spawn_sweeper<F>(self: &Arc<Self>, shutdown: F) -> JoinHandle<()>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let limiter = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(limiter.sweep_interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// the first tick completes immediately
			ticker.tick().await;
			tokio::pin!(shutdown);
			loop {
				tokio::select! {
					_ = &mut shutdown => break,
					_ = ticker.tick() => {
						let removed = limiter.sweep();
						if removed > 0 {
							debug!(removed, remaining = limiter.len(), "swept idle rate limiter clients");
						}
					}
				}
			}
			debug!("rate limiter sweeper stopped");
		})
	}
}

/// Rocket integration.
///
/// By default the limiter sits in front of the whole pipeline: every request
/// is checked as it arrives, and rejected ones are rerouted to a handler that
/// answers 429, whether or not they would have matched a route. A
/// [`scoped`](RateLimit::scoped) limiter only guards the routes passed
/// through [`wrap`](RateLimit::wrap), so several can coexist per route group.
/// Either way the fairing runs the sweeper for the lifetime of the server.
pub struct RateLimit<C: Clock + Clone = DefaultClock> {
	limiter: Arc<ClientLimiter<C>>,
	resolver: Arc<dyn ClientResolver>,
	pipeline: bool,
}

impl<C: Clock + Clone> Clone for RateLimit<C> {
	fn clone(&self) -> Self {
		Self { limiter: Arc::clone(&self.limiter), resolver: Arc::clone(&self.resolver), pipeline: self.pipeline }
	}
}

impl<C> RateLimit<C>
where
	C: Clock + Clone + Send + Sync + 'static,
	C::Instant: Send + Sync,
{
	pub fn new(limiter: ClientLimiter<C>) -> Self {
		Self { limiter: Arc::new(limiter), resolver: Arc::new(ForwardedResolver), pipeline: true }
	}

	pub fn with_resolver<R: ClientResolver>(mut self, resolver: R) -> Self {
		self.resolver = Arc::new(resolver);
		self
	}

	/// Limits only the routes passed through [`wrap`](RateLimit::wrap).
	pub fn scoped(mut self) -> Self {
		self.pipeline = false;
		self
	}

	pub fn limiter(&self) -> &Arc<ClientLimiter<C>> {
		&self.limiter
	}

	/// Admits or rejects `req`. The client is charged at most once per
	/// request, however many routes the request is tried against.
	pub fn admit(&self, req: &Request<'_>) -> bool {
		admit(&self.limiter, self.resolver.as_ref(), req)
	}

	/// Puts every route's handler behind the limiter.
	pub fn wrap(&self, routes: Vec<Route>) -> Vec<Route> {
		routes
			.into_iter()
			.map(|mut route| {
				route.handler = Box::new(Limited {
					inner: route.handler,
					limiter: Arc::clone(&self.limiter),
					resolver: Arc::clone(&self.resolver),
				});
				route
			})
			.collect()
	}
}

/// Decisions already taken for the request in flight, keyed by limiter.
#[derive(Default)]
struct Verdicts(Mutex<Vec<(usize, bool)>>);

fn admit<C: Clock + Clone>(limiter: &Arc<ClientLimiter<C>>, resolver: &dyn ClientResolver, req: &Request<'_>) -> bool {
	if !limiter.is_active() {
		return true;
	}
	let key = Arc::as_ptr(limiter) as *const () as usize;
	let mut verdicts = req.local_cache(Verdicts::default).0.lock();
	if let Some(&(_, allowed)) = verdicts.iter().find(|(k, _)| *k == key) {
		return allowed;
	}
	let client = resolver.resolve(req).unwrap_or_else(|| FALLBACK_CLIENT_KEY.to_string());
	let allowed = limiter.allow(&client);
	if !allowed {
		warn!(client = %client, method = %req.method(), uri = %req.uri(), "rate limit exceeded");
	}
	verdicts.push((key, allowed));
	allowed
}

struct Limited<C: Clock + Clone> {
	inner: Box<dyn Handler>,
	limiter: Arc<ClientLimiter<C>>,
	resolver: Arc<dyn ClientResolver>,
}

impl<C: Clock + Clone> Clone for Limited<C> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			limiter: Arc::clone(&self.limiter),
			resolver: Arc::clone(&self.resolver),
		}
	}
}

#[rocket::async_trait]
impl<C> Handler for Limited<C>
where
	C: Clock + Clone + Send + Sync + 'static,
	C::Instant: Send + Sync,
{
	async fn handle<'r>(&self, req: &'r Request<'_>, data: Data<'r>) -> route::Outcome<'r> {
		if !admit(&self.limiter, self.resolver.as_ref(), req) {
			return route::Outcome::from(req, ApiError::RateLimitExceeded);
		}
		self.inner.handle(req, data).await
	}
}

/// Where pipeline-wide rejections are rerouted.
const REJECTED_PATH: &str = "/__rate_limited";
const REJECTED_ROUTE: &str = "rate_limited";

#[derive(Clone)]
struct Rejected;

#[rocket::async_trait]
impl Handler for Rejected {
	async fn handle<'r>(&self, req: &'r Request<'_>, _data: Data<'r>) -> route::Outcome<'r> {
		route::Outcome::from(req, ApiError::RateLimitExceeded)
	}
}

#[rocket::async_trait]
impl<C> Fairing for RateLimit<C>
where
	C: Clock + Clone + Send + Sync + 'static,
	C::Instant: Send + Sync,
{
	fn info(&self) -> Info {
		let kind = if self.pipeline { Kind::Ignite | Kind::Request | Kind::Liftoff } else { Kind::Liftoff };
		Info { name: "Per-Client Rate Limiter", kind }
	}

	async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
		if rocket.routes().any(|r| r.name.as_deref() == Some(REJECTED_ROUTE)) {
			return Ok(rocket);
		}
		let mut route = Route::new(Method::Get, REJECTED_PATH, Rejected);
		route.name = Some(REJECTED_ROUTE.into());
		Ok(rocket.mount("/", vec![route]))
	}

	async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
		if self.admit(req) {
			return;
		}
		if let Ok(uri) = Origin::parse(REJECTED_PATH) {
			req.set_method(Method::Get);
			req.set_uri(uri);
		}
	}

	async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
		if !self.limiter.is_active() {
			info!("rate limiter inactive; requests are not limited");
			return;
		}
		self.limiter.spawn_sweeper(rocket.shutdown());
		info!(
			pipeline = self.pipeline,
			sweep_every = ?self.limiter.sweep_interval,
			stale_after = ?self.limiter.stale_after,
			"rate limiter sweeper started"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use governor::clock::FakeRelativeClock;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Barrier;

	fn limiter(rps: f64, burst: u32) -> (ClientLimiter<FakeRelativeClock>, FakeRelativeClock) {
		let clock = FakeRelativeClock::default();
		let limiter = ClientLimiter::with_clock(&LimiterConfig::new(rps, burst, true), clock.clone()).unwrap();
		(limiter, clock)
	}

	#[test]
	fn burst_is_admitted_then_rejected() {
		let (limiter, _clock) = limiter(1.0, 5);
		for _ in 0..5 {
			assert!(limiter.allow("1.2.3.4"));
		}
		assert!(!limiter.allow("1.2.3.4"));
	}

	#[test]
	fn one_token_refills_after_one_period() {
		let (limiter, clock) = limiter(2.0, 4);
		for _ in 0..4 {
			assert!(limiter.allow("1.2.3.4"));
		}
		assert!(!limiter.allow("1.2.3.4"));

		clock.advance(Duration::from_millis(500));
		assert!(limiter.allow("1.2.3.4"));
		assert!(!limiter.allow("1.2.3.4"));
	}

	#[test]
	fn bucket_never_exceeds_burst() {
		let (limiter, clock) = limiter(10.0, 3);
		assert!(limiter.allow("a"));
		clock.advance(Duration::from_secs(60));
		let admitted = (0..10).filter(|_| limiter.allow("a")).count();
		assert_eq!(admitted, 3);
	}

	#[test]
	fn clients_do_not_share_quota() {
		let (limiter, _clock) = limiter(1.0, 2);
		assert!(limiter.allow("a"));
		assert!(limiter.allow("a"));
		assert!(!limiter.allow("a"));
		assert!(limiter.allow("b"));
		assert!(limiter.allow("b"));
		assert_eq!(limiter.len(), 2);
	}

	#[test]
	fn inactive_limiter_admits_everything_and_tracks_nothing() {
		let clock = FakeRelativeClock::default();
		let limiter = ClientLimiter::with_clock(&LimiterConfig::new(1.0, 1, false), clock).unwrap();
		assert!((0..1_000).all(|_| limiter.allow("1.2.3.4")));
		assert!(limiter.is_empty());
	}

	#[test]
	fn sweep_drops_only_stale_clients() {
		let (limiter, clock) = limiter(1.0, 1);
		limiter.allow("old");
		clock.advance(Duration::from_secs(180));
		limiter.allow("fresh");
		clock.advance(Duration::from_secs(60));

		// "old" was last seen 4 minutes ago, "fresh" 1 minute ago
		assert_eq!(limiter.sweep(), 1);
		assert!(!limiter.contains("old"));
		assert!(limiter.contains("fresh"));
	}

	#[test]
	fn activity_keeps_a_client_alive() {
		let (limiter, clock) = limiter(1.0, 1);
		limiter.allow("busy");
		clock.advance(Duration::from_secs(170));
		// rejected requests still count as activity
		limiter.allow("busy");
		clock.advance(Duration::from_secs(170));
		assert_eq!(limiter.sweep(), 0);
		assert!(limiter.contains("busy"));
	}

	#[test]
	fn concurrent_requests_consume_exactly_the_burst() {
		let (limiter, _clock) = limiter(1.0, 10);
		let limiter = Arc::new(limiter);
		let barrier = Arc::new(Barrier::new(100));
		let admitted = Arc::new(AtomicUsize::new(0));

		let handles: Vec<_> = (0..100)
			.map(|_| {
				let limiter = Arc::clone(&limiter);
				let barrier = Arc::clone(&barrier);
				let admitted = Arc::clone(&admitted);
				std::thread::spawn(move || {
					barrier.wait();
					if limiter.allow("9.9.9.9") {
						admitted.fetch_add(1, Ordering::SeqCst);
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		assert_eq!(admitted.load(Ordering::SeqCst), 10);
		assert_eq!(limiter.len(), 1);
	}

	#[test]
	fn quota_rejects_unusable_settings() {
		assert_eq!(quota(&LimiterConfig::new(0.0, 4, true)).unwrap_err(), LimiterError::InvalidRate(0.0));
		assert_eq!(quota(&LimiterConfig::new(-1.0, 4, true)).unwrap_err(), LimiterError::InvalidRate(-1.0));
		assert!(matches!(quota(&LimiterConfig::new(f64::NAN, 4, true)), Err(LimiterError::InvalidRate(_))));
		assert_eq!(quota(&LimiterConfig::new(2.0, 0, true)).unwrap_err(), LimiterError::ZeroBurst);
		assert!(quota(&LimiterConfig::new(0.25, 1, true)).is_ok());
	}

	#[test]
	fn extreme_rates_are_clamped_not_rejected() {
		let fast = quota(&LimiterConfig::new(1e12, 1, true)).unwrap();
		assert_eq!(fast.replenish_interval(), MIN_PERIOD);
		let slow = quota(&LimiterConfig::new(1e-30, 1, true)).unwrap();
		assert_eq!(slow.replenish_interval(), MAX_PERIOD);
	}

	#[tokio::test]
	async fn sweeper_prunes_until_shutdown() {
		let clock = FakeRelativeClock::default();
		let limiter = ClientLimiter::with_clock(&LimiterConfig::new(1.0, 1, true), clock.clone())
			.unwrap()
			.with_sweep(Duration::from_millis(10), STALE_AFTER);
		let limiter = Arc::new(limiter);
		limiter.allow("idle");
		clock.advance(Duration::from_secs(240));

		let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
		let handle = limiter.spawn_sweeper(async move {
			let _ = stop_rx.await;
		});

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(limiter.is_empty());

		stop_tx.send(()).unwrap();
		tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
	}
}
