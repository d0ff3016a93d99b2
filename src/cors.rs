use std::str::FromStr;

use rocket::fairing::{self, Fairing, Info, Kind};
use rocket::http::Method;
use rocket::{Build, Data, Request, Response, Rocket};
use rocket_cors::{AllowedHeaders, AllowedMethods, AllowedOrigins, Cors, CorsOptions};

use crate::config::CorsConfig;

/// CORS for trusted origins only. Requests from any other origin pass
/// through untouched and simply get no `Access-Control-Allow-Origin`.
pub struct TrustedCors {
	cors: Cors,
	origins: Vec<String>,
}

impl TrustedCors {
	fn handles(&self, req: &Request<'_>) -> bool {
		match req.headers().get_one("Origin") {
			Some(origin) => self.origins.iter().any(|o| o == origin.trim()),
			None => true,
		}
	}
}

/// Preflights may send the `Authorization` and `Content-Type` headers.
pub fn build_cors(config: &CorsConfig) -> Result<TrustedCors, rocket_cors::Error> {
	let allowed_methods: AllowedMethods = config
		.methods()
		.iter()
		.filter_map(|m| Method::from_str(m).ok())
		.map(From::from)
		.collect();

	let cors = CorsOptions {
		allowed_origins: AllowedOrigins::some_exact(&config.origins()),
		allowed_methods,
		allowed_headers: AllowedHeaders::some(&["Authorization", "Content-Type"]),
		allow_credentials: false,
		..Default::default()
	}
	.to_cors()?;
	Ok(TrustedCors { cors, origins: config.origins().into_iter().map(str::to_string).collect() })
}

#[rocket::async_trait]
impl Fairing for TrustedCors {
	fn info(&self) -> Info {
		Info { name: "CORS (trusted origins)", kind: Kind::Ignite | Kind::Request | Kind::Response }
	}

	async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
		self.cors.on_ignite(rocket).await
	}

	async fn on_request(&self, req: &mut Request<'_>, data: &mut Data<'_>) {
		if self.handles(req) {
			self.cors.on_request(req, data).await;
		}
	}

	async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
		if self.handles(req) {
			self.cors.on_response(req, res).await;
		}
	}
}
