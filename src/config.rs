use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use clap::{ArgAction, Args, ValueEnum};
use serde::Serialize;
use thiserror::Error;

/// Methods a CORS preflight may advertise.
const CORS_METHODS: [&str; 7] = ["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];
const DEFAULT_CORS_METHODS: [&str; 4] = ["DELETE", "OPTIONS", "PATCH", "PUT"];

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid server address {0:?}: expected [HOST]:PORT")]
	InvalidAddr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
	Development,
	Staging,
	Production,
}

impl fmt::Display for Environment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Environment::Development => "development",
			Environment::Staging => "staging",
			Environment::Production => "production",
		})
	}
}

/// Configuration for the web application server.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
	/// HTTP address in format: [HOST]:PORT
	#[arg(long = "addr", env = "ADDR", default_value = "127.0.0.1:4000")]
	pub addr: String,
	/// Environment (development|staging|production)
	#[arg(long = "env", env = "APP_ENV", value_enum, default_value_t = Environment::Development)]
	pub env: Environment,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self { addr: "127.0.0.1:4000".into(), env: Environment::Development }
	}
}

impl ServerConfig {
	/// Resolves `addr`, treating a bare `:PORT` as every interface.
	pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
		let addr = self.addr.trim();
		let candidate = match addr.strip_prefix(':') {
			Some(port) => format!("0.0.0.0:{port}"),
			None => addr.to_string(),
		};
		candidate
			.to_socket_addrs()
			.ok()
			.and_then(|mut addrs| addrs.next())
			.ok_or_else(|| ConfigError::InvalidAddr(self.addr.clone()))
	}
}

/// Where a companion authentication service can be reached.
#[derive(Debug, Clone, Args)]
pub struct AuthServiceConfig {
	/// Auth service HTTP address in format: [HOST]:PORT
	#[arg(id = "auth_service_addr", long = "auth-service-addr", env = "AUTH_SERVICE_ADDR", default_value = "127.0.0.1:4001")]
	pub addr: String,
}

impl Default for AuthServiceConfig {
	fn default() -> Self {
		Self { addr: "127.0.0.1:4001".into() }
	}
}

impl AuthServiceConfig {
	/// Base URL for requests to the service; a bare `:PORT` means localhost.
	pub fn base_url(&self) -> String {
		let addr = self.addr.trim();
		match addr.strip_prefix(':') {
			Some(port) => format!("http://localhost:{port}"),
			None => format!("http://{addr}"),
		}
	}
}

/// Configuration for the per-client rate limiter.
#[derive(Debug, Clone, Args)]
pub struct LimiterConfig {
	/// Rate limiter max requests per second
	#[arg(long = "limiter-rps", env = "LIMITER_RPS", default_value_t = 2.0)]
	pub rps: f64,
	/// Rate limiter max burst
	#[arg(long = "limiter-burst", env = "LIMITER_BURST", default_value_t = 4)]
	pub burst: u32,
	/// Activate rate limiter
	#[arg(long = "limiter-active", env = "LIMITER_ACTIVE", default_value_t = true, action = ArgAction::Set)]
	pub active: bool,
}

impl LimiterConfig {
	pub fn new(rps: f64, burst: u32, active: bool) -> Self {
		Self { rps, burst, active }
	}
}

impl Default for LimiterConfig {
	fn default() -> Self {
		Self::new(2.0, 4, true)
	}
}

/// Configuration for CORS (Cross-Origin Resource Sharing).
#[derive(Debug, Clone, Default, Args)]
pub struct CorsConfig {
	/// HTTP methods allowed for CORS requests (space separated)
	#[arg(
		long = "cors-allow-methods",
		env = "CORS_ALLOW_METHODS",
		value_delimiter = ' ',
		value_parser = parse_cors_method
	)]
	pub allow_methods: Vec<String>,
	/// Trusted CORS origins (space separated)
	#[arg(long = "cors-trusted-origins", env = "CORS_TRUSTED_ORIGINS", value_delimiter = ' ')]
	pub trusted_origins: Vec<String>,
}

impl CorsConfig {
	/// Sorted, de-duplicated methods, or the default preflight set when none were given.
	pub fn methods(&self) -> Vec<String> {
		let mut methods: Vec<String> = if self.allow_methods.is_empty() {
			DEFAULT_CORS_METHODS.iter().map(|m| m.to_string()).collect()
		} else {
			self.allow_methods.clone()
		};
		methods.sort();
		methods.dedup();
		methods
	}

	pub fn origins(&self) -> Vec<&str> {
		self.trusted_origins.iter().map(|o| o.trim()).filter(|o| !o.is_empty()).collect()
	}

	pub fn is_enabled(&self) -> bool {
		!self.origins().is_empty()
	}
}

fn parse_cors_method(value: &str) -> Result<String, String> {
	let method = value.trim().to_ascii_uppercase();
	if CORS_METHODS.contains(&method.as_str()) {
		Ok(method)
	} else {
		Err(format!("invalid HTTP method for CORS: {value}"))
	}
}

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone, Args)]
pub struct SqlDbConfig {
	/// Database path (":memory:" for an in-memory database)
	#[arg(long = "db-dsn", env = "DB_DSN", default_value = "./svc_toolkit.sqlite")]
	pub dsn: String,
	/// Database max open connections
	#[arg(long = "db-max-open-conns", env = "DB_MAX_OPEN_CONNS", default_value_t = 25)]
	pub max_open_conns: u32,
	/// Database max idle connections
	#[arg(long = "db-max-idle-conns", env = "DB_MAX_IDLE_CONNS", default_value_t = 25)]
	pub max_idle_conns: u32,
	/// Database max connection idle time (e.g. 15m)
	#[arg(
		long = "db-max-idle-time",
		env = "DB_MAX_IDLE_TIME",
		default_value = "15m",
		value_parser = humantime::parse_duration
	)]
	pub max_idle_time: Duration,
}

impl Default for SqlDbConfig {
	fn default() -> Self {
		Self {
			dsn: "./svc_toolkit.sqlite".into(),
			max_open_conns: 25,
			max_idle_conns: 25,
			max_idle_time: Duration::from_secs(15 * 60),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[derive(Debug, Parser)]
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

	#[test]
	fn defaults_match_documented_values() {
		let cli = Cli::try_parse_from(["svc"]).unwrap();
		assert_eq!(cli.limiter.rps, 2.0);
		assert_eq!(cli.limiter.burst, 4);
		assert!(cli.limiter.active);
		assert_eq!(cli.server.env, Environment::Development);
		assert_eq!(cli.db.max_idle_time, Duration::from_secs(900));
		assert_eq!(cli.cors.methods(), vec!["DELETE", "OPTIONS", "PATCH", "PUT"]);
		assert_eq!(cli.auth.addr, "127.0.0.1:4001");
	}

	#[test]
	fn auth_service_address_becomes_a_base_url() {
		let cli = Cli::try_parse_from(["svc", "--auth-service-addr", ":9000"]).unwrap();
		assert_eq!(cli.auth.base_url(), "http://localhost:9000");
		let cfg = AuthServiceConfig { addr: "auth.internal:80".into() };
		assert_eq!(cfg.base_url(), "http://auth.internal:80");
	}

	#[test]
	fn limiter_flags_override_defaults() {
		let cli = Cli::try_parse_from([
			"svc",
			"--limiter-rps",
			"0.5",
			"--limiter-burst",
			"10",
			"--limiter-active",
			"false",
		])
		.unwrap();
		assert_eq!(cli.limiter.rps, 0.5);
		assert_eq!(cli.limiter.burst, 10);
		assert!(!cli.limiter.active);
	}

	#[test]
	fn cors_methods_are_uppercased_sorted_and_checked() {
		let cli = Cli::try_parse_from(["svc", "--cors-allow-methods", "put get patch"]).unwrap();
		assert_eq!(cli.cors.methods(), vec!["GET", "PATCH", "PUT"]);

		let err = Cli::try_parse_from(["svc", "--cors-allow-methods", "get fetch"]).unwrap_err();
		assert!(err.to_string().contains("invalid HTTP method for CORS: fetch"));
	}

	#[test]
	fn trusted_origins_split_on_spaces() {
		let cli = Cli::try_parse_from([
			"svc",
			"--cors-trusted-origins",
			"https://a.example https://b.example",
		])
		.unwrap();
		assert_eq!(cli.cors.origins(), vec!["https://a.example", "https://b.example"]);
		assert!(cli.cors.is_enabled());
	}

	#[test]
	fn bare_port_binds_all_interfaces() {
		let cfg = ServerConfig { addr: ":8080".into(), ..Default::default() };
		assert_eq!(cfg.socket_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());

		let bad = ServerConfig { addr: "nope".into(), ..Default::default() };
		assert!(matches!(bad.socket_addr(), Err(ConfigError::InvalidAddr(_))));
	}
}
