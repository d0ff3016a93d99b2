//! The JSend response convention: every body carries a `status` of
//! `success`, `fail` or `error`, with `data`, `code` and `message` used
//! depending on which. See <https://github.com/omniti-labs/jsend>.

use std::fmt;

use rocket::http::Status;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::json::{write_json, JsonReply};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAIL: &str = "fail";
pub const STATUS_ERROR: &str = "error";

#[derive(Debug, Error)]
pub enum JSendError {
	#[error("http status code ({code}) for {kind} is not in range {min} to {max}")]
	StatusOutOfRange { code: u16, kind: JSendStatus, min: u16, max: u16 },
	#[error("invalid JSend status field")]
	InvalidStatus,
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
	Success,
	Fail,
	Error,
}

impl JSendStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			JSendStatus::Success => STATUS_SUCCESS,
			JSendStatus::Fail => STATUS_FAIL,
			JSendStatus::Error => STATUS_ERROR,
		}
	}

	/// Inclusive range of HTTP status codes this kind of response may use.
	pub fn http_range(self) -> (u16, u16) {
		match self {
			JSendStatus::Success => (200, 299),
			JSendStatus::Fail => (400, 499),
			JSendStatus::Error => (500, 599),
		}
	}

	pub fn parse(value: &str) -> Result<Self, JSendError> {
		match value {
			STATUS_SUCCESS => Ok(JSendStatus::Success),
			STATUS_FAIL => Ok(JSendStatus::Fail),
			STATUS_ERROR => Ok(JSendStatus::Error),
			_ => Err(JSendError::InvalidStatus),
		}
	}
}

impl fmt::Display for JSendStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A JSend response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSend<T = serde_json::Value> {
	pub status: JSendStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl<T> JSend<T> {
	pub fn success(data: T) -> Self {
		Self { status: JSendStatus::Success, data: Some(data), code: None, message: None }
	}

	/// The request was rejected because of invalid data or call conditions.
	pub fn fail(data: T) -> Self {
		Self { status: JSendStatus::Fail, data: Some(data), code: None, message: None }
	}

	/// The server failed; `message` should make sense to the end user.
	pub fn error(message: impl Into<String>, code: Option<i64>, data: Option<T>) -> Self {
		Self { status: JSendStatus::Error, data, code, message: Some(message.into()) }
	}
}

impl<T: Serialize> JSend<T> {
	/// Renders the payload after checking `status` suits its kind.
	pub fn reply(&self, status: Status) -> Result<JsonReply, JSendError> {
		let (min, max) = self.status.http_range();
		if status.code < min || status.code > max {
			return Err(JSendError::StatusOutOfRange { code: status.code, kind: self.status, min, max });
		}
		Ok(write_json(status, self)?)
	}
}

pub fn write_success<T: Serialize>(status: Status, data: T) -> Result<JsonReply, JSendError> {
	JSend::success(data).reply(status)
}

pub fn write_fail<T: Serialize>(status: Status, data: T) -> Result<JsonReply, JSendError> {
	JSend::fail(data).reply(status)
}

pub fn write_error(status: Status, message: &str, code: Option<i64>) -> Result<JsonReply, JSendError> {
	JSend::<serde_json::Value>::error(message, code, None).reply(status)
}

/// A JSend payload whose `data` is left undecoded until `status` has been
/// checked.
#[derive(Debug, Clone, Deserialize)]
pub struct JSendRaw {
	pub status: String,
	#[serde(default)]
	pub data: Option<serde_json::Value>,
	#[serde(default)]
	pub code: Option<i64>,
	#[serde(default)]
	pub message: Option<String>,
}

impl JSendRaw {
	pub fn status(&self) -> Result<JSendStatus, JSendError> {
		JSendStatus::parse(&self.status)
	}

	/// Decodes `data` into `T`; a missing `data` decodes from `null`.
	pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, JSendError> {
		let data = self.data.clone().unwrap_or(serde_json::Value::Null);
		Ok(serde_json::from_value(data)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn success_payload_omits_empty_fields() {
		let reply = write_success(Status::Ok, json!({"id": 7})).unwrap();
		let body: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
		assert_eq!(body, json!({"status": "success", "data": {"id": 7}}));
	}

	#[test]
	fn error_payload_carries_message_and_code() {
		let reply = write_error(Status::ServiceUnavailable, "try later", Some(17)).unwrap();
		let body: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
		assert_eq!(body, json!({"status": "error", "code": 17, "message": "try later"}));
		assert_eq!(reply.status, Status::ServiceUnavailable);
	}

	#[test]
	fn status_codes_must_match_the_kind() {
		let err = write_fail(Status::Ok, json!({"error": "nope"})).unwrap_err();
		assert_eq!(err.to_string(), "http status code (200) for fail is not in range 400 to 499");

		assert!(write_success(Status::NotFound, json!(null)).is_err());
		assert!(write_error(Status::BadRequest, "oops", None).is_err());
		assert!(write_fail(Status::TooManyRequests, json!({})).is_ok());
	}

	#[test]
	fn raw_payloads_check_status_before_data() {
		let raw: JSendRaw = serde_json::from_str(r#"{"status":"success","data":{"n":3}}"#).unwrap();
		assert_eq!(raw.status().unwrap(), JSendStatus::Success);
		let data: serde_json::Value = raw.decode_data().unwrap();
		assert_eq!(data["n"], 3);

		let raw: JSendRaw = serde_json::from_str(r#"{"status":"maybe"}"#).unwrap();
		assert!(matches!(raw.status(), Err(JSendError::InvalidStatus)));
	}
}
