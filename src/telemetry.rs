use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. Safe to call more than once; only the
/// first call has an effect.
pub fn init_tracing() {
	let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rocket=info".into());
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(env_filter))
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.ok();
}
