use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ApiError;

pub static BETTER_GUID_RX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{20}$").expect("static regex"));
pub static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
	)
	.expect("static regex")
});
pub static USERNAME_RX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{3,30}[A-Za-z0-9]$").expect("static regex"));

/// Collects validation failures keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
	pub errors: BTreeMap<String, String>,
}

impl Validator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn valid(&self) -> bool {
		self.errors.is_empty()
	}

	/// Records an error unless `key` already has one.
	pub fn add_error(&mut self, key: &str, message: impl Into<String>) {
		self.errors.entry(key.to_string()).or_insert_with(|| message.into());
	}

	/// Records `message` against `key` when `ok` is false, replacing any
	/// earlier error for that key.
	pub fn check(&mut self, ok: bool, key: &str, message: impl Into<String>) {
		if !ok {
			self.errors.insert(key.to_string(), message.into());
		}
	}

	pub fn into_result(self) -> Result<(), ApiError> {
		if self.valid() {
			Ok(())
		} else {
			Err(ApiError::FailedValidation(self.errors))
		}
	}
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
	permitted.contains(value)
}

pub fn matches(value: &str, rx: &Regex) -> bool {
	rx.is_match(value)
}

pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
	let seen: HashSet<&T> = values.iter().collect();
	seen.len() == values.len()
}

pub fn validate_email(v: &mut Validator, email: &str) {
	v.check(!email.is_empty(), "email", "must be provided");
	v.check(matches(email, &EMAIL_RX), "email", "must be a valid email address");
}

/// Checks `value` is between `min` and `max` bytes long.
pub fn validate_str_len_bytes(v: &mut Validator, value: &str, key: &str, min: usize, max: usize) {
	let len = value.len();
	if len < min {
		v.add_error(key, format!("must be at least {min} bytes long"));
	} else if len > max {
		v.add_error(key, format!("must not be more than {max} bytes long"));
	}
}

/// Checks `value` is between `min` and `max` characters long.
pub fn validate_str_len_chars(v: &mut Validator, value: &str, key: &str, min: usize, max: usize) {
	let len = value.chars().count();
	if len < min {
		v.add_error(key, format!("must be at least {min} characters long"));
	} else if len > max {
		v.add_error(key, format!("must not be more than {max} characters long"));
	}
}
