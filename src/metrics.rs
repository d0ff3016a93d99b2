use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Status;
use rocket::{Data, Request, Response};
use serde::Serialize;

/// Process-wide HTTP counters, exposed on `/debug`.
#[derive(Debug, Default)]
pub struct Metrics {
	requests_received: AtomicU64,
	responses_sent: AtomicU64,
	processing_time_us: AtomicU64,
	responses_by_status: DashMap<u16, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub total_requests_received: u64,
	pub total_responses_sent: u64,
	pub total_processing_time_us: u64,
	pub total_responses_by_status: BTreeMap<String, u64>,
}

impl Metrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn request_received(&self) {
		self.requests_received.fetch_add(1, Ordering::Relaxed);
	}

	pub fn response_sent(&self, status: Status, elapsed: Duration) {
		self.responses_sent.fetch_add(1, Ordering::Relaxed);
		self.processing_time_us
			.fetch_add(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);
		*self.responses_by_status.entry(status.code).or_insert(0) += 1;
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			total_requests_received: self.requests_received.load(Ordering::Relaxed),
			total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
			total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
			total_responses_by_status: self
				.responses_by_status
				.iter()
				.map(|entry| (entry.key().to_string(), *entry.value()))
				.collect(),
		}
	}
}

/// Counts every request and the status of every response.
pub struct MetricsFairing {
	metrics: Arc<Metrics>,
}

impl MetricsFairing {
	pub fn new(metrics: Arc<Metrics>) -> Self {
		Self { metrics }
	}
}

struct RequestStart(Instant);

#[rocket::async_trait]
impl Fairing for MetricsFairing {
	fn info(&self) -> Info {
		Info { name: "HTTP Metrics", kind: Kind::Request | Kind::Response }
	}

	async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
		self.metrics.request_received();
		req.local_cache(|| RequestStart(Instant::now()));
	}

	async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
		let start = req.local_cache(|| RequestStart(Instant::now()));
		self.metrics.response_sent(res.status(), start.0.elapsed());
	}
}
