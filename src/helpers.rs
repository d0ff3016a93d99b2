use rocket::request::FromParam;

use crate::errors::ApiError;
use crate::validator::Validator;

/// A positive record id taken from a path segment. Use it as
/// `Result<Id, ApiError>` to turn bad ids into a 400 instead of a 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub i64);

impl<'a> FromParam<'a> for Id {
	type Error = ApiError;

	fn from_param(param: &'a str) -> Result<Self, Self::Error> {
		match param.parse::<i64>() {
			Ok(id) if id >= 1 => Ok(Id(id)),
			_ => Err(ApiError::BadRequest("invalid id parameter".into())),
		}
	}
}

pub fn read_string(value: Option<&str>, default: &str) -> String {
	match value {
		Some(s) if !s.is_empty() => s.to_string(),
		_ => default.to_string(),
	}
}

pub fn read_csv(value: Option<&str>, default: &[&str]) -> Vec<String> {
	match value {
		Some(csv) if !csv.is_empty() => csv.split(',').map(str::to_string).collect(),
		_ => default.iter().map(|s| s.to_string()).collect(),
	}
}

/// Parses an integer query value, recording an error against `key` in `v`
/// and returning `default` when it is not one.
pub fn read_int(value: Option<&str>, key: &str, default: i64, v: &mut Validator) -> i64 {
	match value {
		Some(s) if !s.is_empty() => s.parse().unwrap_or_else(|_| {
			v.add_error(key, "must be an integer value");
			default
		}),
		_ => default,
	}
}
