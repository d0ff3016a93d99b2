use std::collections::BTreeMap;

use rocket::http::{Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder};
use thiserror::Error;

use crate::jsend::{JSend, JSendError};
use crate::json::{DecodeError, JsonReply};
use crate::models::ClientErrorResponse;

/// Message returned for every server-side failure; details stay in the logs.
pub const SERVER_ERROR_MESSAGE: &str = "The server encountered a problem and could not process your request";

#[derive(Debug, Error)]
pub enum ApiError {
	#[error("{0}")]
	BadRequest(String),
	#[error("invalid authentication credentials")]
	InvalidCredentials,
	#[error("invalid or missing authentication token")]
	InvalidAuthenticationToken,
	#[error("authentication required")]
	AuthenticationRequired,
	#[error("inactive account")]
	InactiveAccount,
	#[error("not permitted")]
	NotPermitted,
	#[error("not found")]
	NotFound,
	#[error("method {0} not allowed")]
	MethodNotAllowed(String),
	#[error("edit conflict")]
	EditConflict,
	#[error("failed validation")]
	FailedValidation(BTreeMap<String, String>),
	#[error("rate limit exceeded")]
	RateLimitExceeded,
	#[error(transparent)]
	Pool(#[from] r2d2::Error),
	#[error(transparent)]
	Sqlite(#[from] r2d2_sqlite::rusqlite::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	JSend(#[from] JSendError),
	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl From<DecodeError> for ApiError {
	fn from(err: DecodeError) -> Self {
		ApiError::BadRequest(err.to_string())
	}
}

impl ApiError {
	pub fn status(&self) -> Status {
		match self {
			ApiError::BadRequest(_) => Status::BadRequest,
			ApiError::InvalidCredentials => Status::Unauthorized,
			ApiError::InvalidAuthenticationToken => Status::Unauthorized,
			ApiError::AuthenticationRequired => Status::Unauthorized,
			ApiError::InactiveAccount => Status::Forbidden,
			ApiError::NotPermitted => Status::Forbidden,
			ApiError::NotFound => Status::NotFound,
			ApiError::MethodNotAllowed(_) => Status::MethodNotAllowed,
			ApiError::EditConflict => Status::Conflict,
			ApiError::FailedValidation(_) => Status::UnprocessableEntity,
			ApiError::RateLimitExceeded => Status::TooManyRequests,
			ApiError::Pool(_)
			| ApiError::Sqlite(_)
			| ApiError::Json(_)
			| ApiError::Http(_)
			| ApiError::JSend(_)
			| ApiError::Anyhow(_) => Status::InternalServerError,
		}
	}

	/// `data` for a JSend fail response, or `None` for server-side errors.
	pub fn client_data(&self) -> Option<serde_json::Value> {
		let body = match self {
			ApiError::BadRequest(msg) => ClientErrorResponse::new(msg.as_str(), None, None),
			ApiError::InvalidCredentials => ClientErrorResponse::new(
				"Invalid authentication credentials",
				None,
				Some("Check the credentials provided and that an account definitely exists"),
			),
			ApiError::InvalidAuthenticationToken => ClientErrorResponse::new(
				"Invalid or missing authentication token",
				None,
				Some("Check the token provided or request a new one and try again"),
			),
			ApiError::AuthenticationRequired => ClientErrorResponse::new(
				"You must be authenticated to access this resource",
				None,
				Some("Authenticate yourself, then try again with the provided credentials"),
			),
			ApiError::InactiveAccount => ClientErrorResponse::new(
				"Your user account must be activated to access this resource",
				None,
				Some("Activate your account and then try again"),
			),
			ApiError::NotPermitted => ClientErrorResponse::new(
				"Your user account does not have the necessary permissions to access this resource",
				None,
				None,
			),
			ApiError::NotFound => ClientErrorResponse::new("The requested resource could not be found", None, None),
			ApiError::MethodNotAllowed(method) => ClientErrorResponse::new(
				format!("The {method} method is not supported for this resource"),
				None,
				Some("Check the Allow header of an OPTIONS request for a list of accepted methods"),
			),
			ApiError::EditConflict => ClientErrorResponse::new(
				"Unable to update the record due to an edit conflict",
				None,
				Some("Please try again"),
			),
			ApiError::FailedValidation(errors) => return serde_json::to_value(errors).ok(),
			ApiError::RateLimitExceeded => ClientErrorResponse::new(
				"Rate limit exceeded",
				Some("Large numbers of requests from the same IP address are limited over time"),
				Some("Wait a while and then try again, or send fewer requests"),
			),
			_ => return None,
		};
		serde_json::to_value(body).ok()
	}

	/// Renders the JSend reply without touching a request; server errors are not logged here.
	pub fn to_reply(&self) -> Result<JsonReply, JSendError> {
		let status = self.status();
		let reply = match self.client_data() {
			Some(data) => JSend::fail(data).reply(status)?,
			None => JSend::<serde_json::Value>::error(SERVER_ERROR_MESSAGE, None, None).reply(status)?,
		};
		Ok(match self {
			ApiError::InvalidAuthenticationToken => reply.with_header(Header::new("WWW-Authenticate", "Bearer")),
			_ => reply,
		})
	}
}

impl<'r> Responder<'r, 'static> for ApiError {
	fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
		if self.status().class().is_server_error() {
			tracing::error!(
				error = %self,
				request_method = %req.method(),
				request_url = %req.uri(),
				"request failed"
			);
		}
		match self.to_reply() {
			Ok(reply) => reply.respond_to(req),
			Err(err) => {
				tracing::error!(error = %err, request_url = %req.uri(), "failed to render error response");
				Err(Status::InternalServerError)
			}
		}
	}
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn body(err: &ApiError) -> serde_json::Value {
		serde_json::from_str(&err.to_reply().unwrap().body).unwrap()
	}

	#[test]
	fn rate_limit_body_tells_the_client_what_to_do() {
		let err = ApiError::RateLimitExceeded;
		assert_eq!(err.status(), Status::TooManyRequests);
		assert_eq!(
			body(&err),
			json!({
				"status": "fail",
				"data": {
					"error": "Rate limit exceeded",
					"details": "Large numbers of requests from the same IP address are limited over time",
					"action": "Wait a while and then try again, or send fewer requests"
				}
			})
		);
	}

	#[test]
	fn validation_errors_are_the_data() {
		let mut errors = BTreeMap::new();
		errors.insert("email".to_string(), "must be provided".to_string());
		let err = ApiError::FailedValidation(errors);
		assert_eq!(err.status(), Status::UnprocessableEntity);
		assert_eq!(body(&err), json!({"status": "fail", "data": {"email": "must be provided"}}));
	}

	#[test]
	fn server_errors_hide_their_cause() {
		let err = ApiError::Anyhow(anyhow::anyhow!("disk on fire"));
		assert_eq!(err.status(), Status::InternalServerError);
		assert_eq!(body(&err), json!({"status": "error", "message": SERVER_ERROR_MESSAGE}));
	}

	#[test]
	fn bad_tokens_ask_for_bearer_auth() {
		let reply = ApiError::InvalidAuthenticationToken.to_reply().unwrap();
		assert!(reply.headers().iter().any(|h| h.name().as_str() == "WWW-Authenticate" && h.value() == "Bearer"));
	}

	#[test]
	fn method_not_allowed_names_the_method() {
		let data = ApiError::MethodNotAllowed("PATCH".into()).client_data().unwrap();
		assert_eq!(data["error"], "The PATCH method is not supported for this resource");
	}
}
