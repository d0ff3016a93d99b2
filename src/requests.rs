use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::jsend::{JSendError, JSendRaw, JSendStatus};

#[derive(Debug, Error)]
pub enum RequestError {
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	JSend(#[from] JSendError),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error("request rejected by upstream ({status})")]
	Fail { status: StatusCode, data: serde_json::Value },
	#[error("upstream error ({status}): {message}")]
	Error { status: StatusCode, message: String, code: Option<i64> },
}

/// Sends `body` as JSON and decodes a JSend reply, returning the HTTP
/// status and the `data` of a successful response.
pub async fn request_jsend<B, T>(
	client: &Client,
	method: Method,
	url: &str,
	timeout: Duration,
	body: Option<&B>,
) -> Result<(StatusCode, T), RequestError>
where
	B: Serialize + ?Sized,
	T: DeserializeOwned,
{
	let mut req = client.request(method, url).timeout(timeout).header(CONTENT_TYPE, "application/json");
	if let Some(body) = body {
		req = req.json(body);
	}
	let resp = req.send().await?;
	let status = resp.status();
	let bytes = resp.bytes().await?;
	let data = decode_jsend(status, &bytes)?;
	Ok((status, data))
}

/// Two-pass decode: check the JSend status, then decode `data` into `T`.
pub fn decode_jsend<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, RequestError> {
	let raw: JSendRaw = serde_json::from_slice(body)?;
	match raw.status()? {
		JSendStatus::Success => Ok(raw.decode_data()?),
		JSendStatus::Fail => Err(RequestError::Fail { status, data: raw.data.unwrap_or_default() }),
		JSendStatus::Error => Err(RequestError::Error {
			status,
			message: raw.message.unwrap_or_default(),
			code: raw.code,
		}),
	}
}
