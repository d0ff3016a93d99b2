use std::sync::Arc;
use std::time::{Duration, Instant};

use rocket::http::{Header, Status};
use rocket::request::Request;
use rocket::{Catcher, Route, State};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::error;

use crate::config::Environment;
use crate::errors::{ApiError, ApiResult, SERVER_ERROR_MESSAGE};
use crate::jsend::{write_error, write_fail, write_success};
use crate::json::{write_json, JsonReply};
use crate::metrics::Metrics;
use crate::models::ClientErrorResponse;
use crate::vcs;

/// What `/health` reports about the running process.
#[derive(Debug, Clone)]
pub struct AppInfo {
	pub environment: Environment,
	pub started: OffsetDateTime,
	started_at: Instant,
}

impl AppInfo {
	pub fn new(environment: Environment) -> Self {
		Self { environment, started: OffsetDateTime::now_utc(), started_at: Instant::now() }
	}

	pub fn uptime(&self) -> Duration {
		self.started_at.elapsed()
	}
}

#[get("/health")]
pub fn health(app: &State<AppInfo>) -> ApiResult<JsonReply> {
	let uptime = Duration::from_secs(app.uptime().as_secs());
	let data = json!({
		"status": "available",
		"system_info": {
			"environment": app.environment,
			"started": app.started.format(&Rfc3339).unwrap_or_default(),
			"uptime": humantime::format_duration(uptime).to_string(),
			"version": vcs::version(),
		}
	});
	Ok(write_success(Status::Ok, data)?)
}

#[get("/debug")]
pub fn debug(metrics: &State<Arc<Metrics>>) -> ApiResult<JsonReply> {
	Ok(write_json(Status::Ok, &metrics.snapshot())?)
}

pub fn base_routes() -> Vec<Route> {
	routes![health, debug]
}

#[catch(400)]
fn bad_request() -> ApiError {
	ApiError::BadRequest("The request could not be understood by the server".into())
}

#[catch(404)]
fn not_found() -> ApiError {
	ApiError::NotFound
}

#[catch(405)]
fn method_not_allowed(req: &Request<'_>) -> ApiError {
	ApiError::MethodNotAllowed(req.method().to_string())
}

#[catch(422)]
fn unprocessable() -> Result<JsonReply, Status> {
	write_fail(
		Status::UnprocessableEntity,
		ClientErrorResponse::new("The request body could not be processed", None, Some("Check the body and try again")),
	)
	.map_err(|_| Status::UnprocessableEntity)
}

#[catch(429)]
fn too_many_requests() -> ApiError {
	ApiError::RateLimitExceeded
}

/// Reached for handler panics as well as plain 500s; the connection is
/// closed since the handler may have left it in an unknown state.
#[catch(500)]
fn internal_error(req: &Request<'_>) -> Result<JsonReply, Status> {
	error!(request_method = %req.method(), request_url = %req.uri(), "request failed with an internal error");
	write_error(Status::InternalServerError, SERVER_ERROR_MESSAGE, None)
		.map(|reply| reply.with_header(Header::new("Connection", "close")))
		.map_err(|_| Status::InternalServerError)
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> Result<JsonReply, Status> {
	let reply = if status.class().is_server_error() {
		write_error(status, SERVER_ERROR_MESSAGE, None)
	} else {
		write_fail(status, ClientErrorResponse::new(status.reason().unwrap_or_default(), None, None))
	};
	reply.map_err(|_| status)
}

pub fn catchers() -> Vec<Catcher> {
	catchers![bad_request, not_found, method_not_allowed, unprocessable, too_many_requests, internal_error, default_catcher]
}
