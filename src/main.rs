#![allow(clippy::result_large_err)]

#[macro_use]
extern crate rocket;

mod contacts;

use clap::Parser;
use dotenvy::dotenv;

use svc_toolkit::config::{AuthServiceConfig, CorsConfig, LimiterConfig, ServerConfig, SqlDbConfig};
use svc_toolkit::cors::build_cors;
use svc_toolkit::db::open_pool;
use svc_toolkit::telemetry::init_tracing;
use svc_toolkit::{ClientLimiter, RateLimit, WebApp};

#[derive(Debug, Parser)]
#[command(name = "svc_toolkit")]
#[command(about = "Example contacts API built on the service toolkit", long_about = None)]
struct Cli {
	#[command(flatten)]
	server: ServerConfig,
	#[command(flatten)]
	limiter: LimiterConfig,
	#[command(flatten)]
	cors: CorsConfig,
	#[command(flatten)]
	db: SqlDbConfig,
	#[command(flatten)]
	auth: AuthServiceConfig,
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
	// Load local .env (for local dev) before flags read their env fallbacks
	dotenv().ok();
	init_tracing();
	let cli = Cli::parse();

	let pool = open_pool(&cli.db)?;
	contacts::migrate(&pool)?;

	let limit = RateLimit::new(ClientLimiter::new(&cli.limiter)?);
	let cors = if cli.cors.is_enabled() { Some(build_cors(&cli.cors)?) } else { None };

	let app = WebApp::new(cli.server);
	tracing::info!(auth_service = %cli.auth.base_url(), "auth service configured");
	let rocket = app
		.build(Some(&limit), cors)?
		.manage(pool)
		.mount("/v1", contacts::routes());

	app.serve(rocket).await
}
