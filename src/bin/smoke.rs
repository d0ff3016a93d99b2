use std::time::Duration;

use clap::Parser;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use svc_toolkit::requests::{request_jsend, RequestError};

#[derive(Parser, Debug)]
#[command(name = "svc_smoke")]
#[command(about = "Smoke test for a running svc_toolkit service", long_about = None)]
struct Opts {
	#[arg(long, default_value = "http://127.0.0.1:4000")]
	base: String,
	/// Requests to fire when probing the rate limiter
	#[arg(long, default_value_t = 50)]
	burst: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let opts = Opts::parse();
	let client = reqwest::Client::new();
	let timeout = Duration::from_secs(5);

	println!("[1/2] GET /health");
	let (status, data): (StatusCode, Value) =
		request_jsend(&client, Method::GET, &format!("{}/health", opts.base), timeout, None::<&()>).await?;
	println!("  status: {status}");
	anyhow::ensure!(data["status"] == "available", "health did not report available");

	println!("[2/2] GET /health x{}", opts.burst);
	let mut limited = 0;
	for _ in 0..opts.burst {
		match request_jsend::<(), Value>(&client, Method::GET, &format!("{}/health", opts.base), timeout, None).await {
			Ok(_) => {}
			Err(RequestError::Fail { status: StatusCode::TOO_MANY_REQUESTS, .. }) => limited += 1,
			Err(err) => return Err(err.into()),
		}
	}
	println!("  rate limited: {limited}");
	// A service started with --limiter-active=false never limits
	anyhow::ensure!(limited > 0, "no request was rate limited");

	println!("OK");
	Ok(())
}
