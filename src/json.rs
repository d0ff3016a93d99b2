use std::io::Cursor;

use rocket::data::{self, ByteUnit, Data, FromData};
use rocket::http::{ContentType, Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use crate::errors::ApiError;

/// Largest request body `read_json` accepts.
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Payload of a JSON response mapping string keys to arbitrary values.
pub type Envelope = serde_json::Map<String, serde_json::Value>;

/// Client-facing reasons a request body could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("body must not be empty")]
	Empty,
	#[error("body contains badly formatted JSON at line {line} column {column}")]
	Syntax { line: usize, column: usize },
	#[error("body contains badly formed JSON")]
	Truncated,
	#[error("body contains incorrect JSON type at line {line} column {column}")]
	IncorrectType { line: usize, column: usize },
	#[error("body contains incorrect JSON type for field \"{0}\"")]
	IncorrectField(String),
	#[error("body contains unknown key \"{0}\"")]
	UnknownKey(String),
	#[error("body is missing key \"{0}\"")]
	MissingKey(String),
	#[error("body must only contain a single JSON value")]
	TrailingData,
	#[error("body must not be larger than {0} bytes")]
	TooLarge(usize),
	#[error("{0}")]
	Invalid(String),
}

/// Decodes a JSON body, rejecting anything over `limit` bytes.
///
/// Unknown fields are only reported for targets that opt into
/// `#[serde(deny_unknown_fields)]`.
pub fn decode_json<T: DeserializeOwned>(body: &[u8], limit: usize) -> Result<T, DecodeError> {
	if body.len() > limit {
		return Err(DecodeError::TooLarge(limit));
	}
	if body.iter().all(u8::is_ascii_whitespace) {
		return Err(DecodeError::Empty);
	}
	let mut de = serde_json::Deserializer::from_slice(body);
	let value = serde_path_to_error::deserialize(&mut de).map_err(|err| {
		let field = err.path().to_string();
		classify(err.into_inner(), &field)
	})?;
	de.end().map_err(|err| classify(err, "."))?;
	Ok(value)
}

/// Reads a request body of at most [`MAX_BODY_BYTES`] and decodes it.
pub async fn read_json<T: DeserializeOwned>(data: Data<'_>) -> Result<T, DecodeError> {
	let capped = data
		.open(ByteUnit::from(MAX_BODY_BYTES as u64))
		.into_bytes()
		.await
		.map_err(|_| DecodeError::Truncated)?;
	if !capped.is_complete() {
		return Err(DecodeError::TooLarge(MAX_BODY_BYTES));
	}
	decode_json(&capped.into_inner(), MAX_BODY_BYTES)
}

/// `field` is the path serde was decoding when it failed, `.` for the root.
fn classify(err: serde_json::Error, field: &str) -> DecodeError {
	let (line, column) = (err.line(), err.column());
	match err.classify() {
		Category::Eof | Category::Io => DecodeError::Truncated,
		Category::Syntax => {
			if err.to_string().starts_with("trailing characters") {
				DecodeError::TrailingData
			} else {
				DecodeError::Syntax { line, column }
			}
		}
		Category::Data => {
			let message = err.to_string();
			if let Some(key) = backticked(&message, "unknown field `") {
				DecodeError::UnknownKey(key)
			} else if let Some(key) = backticked(&message, "missing field `") {
				DecodeError::MissingKey(key)
			} else if message.starts_with("invalid type") || message.starts_with("invalid length") {
				match field {
					"" | "." => DecodeError::IncorrectType { line, column },
					field => DecodeError::IncorrectField(field.to_string()),
				}
			} else {
				DecodeError::Invalid(strip_position(&message).to_string())
			}
		}
	}
}

fn backticked(message: &str, prefix: &str) -> Option<String> {
	let rest = message.strip_prefix(prefix)?;
	rest.split('`').next().map(str::to_string)
}

fn strip_position(message: &str) -> &str {
	match message.rfind(" at line ") {
		Some(idx) => &message[..idx],
		None => message,
	}
}

/// Serialises `value` indented with tabs and terminated by a newline.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
	let mut buf = Vec::with_capacity(128);
	let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
	value.serialize(&mut ser)?;
	buf.push(b'\n');
	// serde_json only ever emits valid UTF-8
	Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Data guard decoding a JSON body with [`read_json`]. Take it as
/// `Result<JsonBody<T>, ApiError>` so the decode reason reaches the client.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[rocket::async_trait]
impl<'r, T: DeserializeOwned + Send> FromData<'r> for JsonBody<T> {
	type Error = ApiError;

	async fn from_data(_req: &'r Request<'_>, data: Data<'r>) -> data::Outcome<'r, Self> {
		match read_json(data).await {
			Ok(value) => data::Outcome::Success(JsonBody(value)),
			Err(err) => data::Outcome::Error((Status::BadRequest, err.into())),
		}
	}
}

/// A fully rendered JSON response.
#[derive(Debug, Clone)]
pub struct JsonReply {
	pub status: Status,
	pub body: String,
	headers: Vec<Header<'static>>,
}

impl JsonReply {
	pub fn with_header(mut self, header: Header<'static>) -> Self {
		self.headers.push(header);
		self
	}

	pub fn headers(&self) -> &[Header<'static>] {
		&self.headers
	}
}

/// Renders `data` as the body of a response with the given status.
pub fn write_json<T: Serialize + ?Sized>(status: Status, data: &T) -> serde_json::Result<JsonReply> {
	Ok(JsonReply { status, body: encode_json(data)?, headers: Vec::new() })
}

impl<'r> Responder<'r, 'static> for JsonReply {
	fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
		let mut builder = Response::build();
		for header in self.headers {
			builder.header_adjoin(header);
		}
		builder
			.status(self.status)
			.header(ContentType::JSON)
			.sized_body(self.body.len(), Cursor::new(self.body))
			.ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, Deserialize, PartialEq)]
	#[serde(deny_unknown_fields)]
	struct Movie {
		title: String,
		year: u16,
	}

	fn decode(body: &str) -> Result<Movie, DecodeError> {
		decode_json(body.as_bytes(), MAX_BODY_BYTES)
	}

	#[test]
	fn decodes_a_well_formed_body() {
		let movie = decode(r#"{"title":"Alien","year":1979}"#).unwrap();
		assert_eq!(movie, Movie { title: "Alien".into(), year: 1979 });
	}

	#[test]
	fn empty_body_is_reported() {
		assert_eq!(decode(""), Err(DecodeError::Empty));
		assert_eq!(decode("  \n"), Err(DecodeError::Empty));
	}

	#[test]
	fn malformed_bodies_are_translated() {
		assert!(matches!(decode(r#"{"title" "Alien"}"#), Err(DecodeError::Syntax { line: 1, .. })));
		assert_eq!(decode(r#"{"title":"Alien""#), Err(DecodeError::Truncated));
		assert!(matches!(decode(r#""Alien""#), Err(DecodeError::IncorrectType { line: 1, .. })));
	}

	#[test]
	fn wrong_types_name_the_field() {
		let err = decode(r#"{"title":"Alien","year":"1979"}"#).unwrap_err();
		assert_eq!(err, DecodeError::IncorrectField("year".into()));
		assert_eq!(err.to_string(), "body contains incorrect JSON type for field \"year\"");
	}

	#[test]
	fn unknown_and_missing_keys_are_named() {
		let err = decode(r#"{"title":"Alien","year":1979,"rating":5}"#).unwrap_err();
		assert_eq!(err, DecodeError::UnknownKey("rating".into()));
		assert_eq!(err.to_string(), "body contains unknown key \"rating\"");

		assert_eq!(decode(r#"{"title":"Alien"}"#), Err(DecodeError::MissingKey("year".into())));
	}

	#[test]
	fn only_one_value_is_allowed() {
		let err = decode(r#"{"title":"Alien","year":1979} {}"#).unwrap_err();
		assert_eq!(err.to_string(), "body must only contain a single JSON value");
	}

	#[test]
	fn oversized_bodies_are_rejected_before_parsing() {
		let err = decode_json::<Movie>(br#"{"title":"Alien","year":1979}"#, 8).unwrap_err();
		assert_eq!(err.to_string(), "body must not be larger than 8 bytes");
	}

	#[test]
	fn encoding_uses_tabs_and_a_trailing_newline() {
		let body = encode_json(&serde_json::json!({"a": 1})).unwrap();
		assert_eq!(body, "{\n\t\"a\": 1\n}\n");
	}
}
