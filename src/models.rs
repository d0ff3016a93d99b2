use std::fmt;
use std::str::FromStr;

use r2d2_sqlite::rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Data of a JSend `fail` response: always an `error`, optionally with
/// `details` and an `action` the client can take to recover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientErrorResponse {
	pub error: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub action: Option<String>,
}

impl ClientErrorResponse {
	pub fn new(error: impl Into<String>, details: Option<&str>, action: Option<&str>) -> Self {
		let mut error = error.into();
		if error.is_empty() {
			error = "No error details provided".into();
		}
		Self {
			error,
			details: details.filter(|d| !d.is_empty()).map(str::to_string),
			action: action.filter(|a| !a.is_empty()).map(str::to_string),
		}
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid date format for DateOnly")]
pub struct InvalidDateOnly;

/// A calendar date without a time component, carried as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateOnly(pub Date);

impl DateOnly {
	pub fn today() -> Self {
		Self(OffsetDateTime::now_utc().date())
	}
}

impl FromStr for DateOnly {
	type Err = InvalidDateOnly;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Date::parse(s, DATE_ONLY).map(DateOnly).map_err(|_| InvalidDateOnly)
	}
}

impl fmt::Display for DateOnly {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let rendered = self.0.format(DATE_ONLY).map_err(|_| fmt::Error)?;
		f.write_str(&rendered)
	}
}

impl Serialize for DateOnly {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for DateOnly {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}

impl ToSql for DateOnly {
	fn to_sql(&self) -> r2d2_sqlite::rusqlite::Result<ToSqlOutput<'_>> {
		Ok(ToSqlOutput::from(self.to_string()))
	}
}

impl FromSql for DateOnly {
	fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
		value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
	}
}
