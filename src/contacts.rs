//! A small contacts API that exercises the toolkit end to end.

use std::collections::BTreeMap;

use r2d2_sqlite::rusqlite::{self, params, OptionalExtension, Row};
use rocket::http::Status;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::json;

use svc_toolkit::db::{DbError, SqlitePool, UniqueConstraintViolation};
use svc_toolkit::helpers::{read_int, read_string, Id};
use svc_toolkit::jsend::write_success;
use svc_toolkit::json::{JsonBody, JsonReply};
use svc_toolkit::models::DateOnly;
use svc_toolkit::validator::{permitted_value, validate_email, validate_str_len_chars, Validator};
use svc_toolkit::{ApiError, ApiResult};

const SORT_SAFELIST: [&str; 4] = ["id", "name", "-id", "-name"];
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
	pub id: i64,
	pub name: String,
	pub email: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub birthday: Option<DateOnly>,
	pub version: i64,
}

impl Contact {
	fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
		Ok(Self {
			id: row.get(0)?,
			name: row.get(1)?,
			email: row.get(2)?,
			birthday: row.get(3)?,
			version: row.get(4)?,
		})
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NewContact {
	name: String,
	email: String,
	#[serde(default)]
	birthday: Option<DateOnly>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContactPatch {
	name: Option<String>,
	email: Option<String>,
	birthday: Option<DateOnly>,
}

pub fn migrate(pool: &SqlitePool) -> Result<(), DbError> {
	let conn = pool.get()?;
	conn.execute_batch(
		"CREATE TABLE IF NOT EXISTS contacts (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			name TEXT NOT NULL,
			email TEXT NOT NULL UNIQUE,
			birthday TEXT,
			version INTEGER NOT NULL DEFAULT 1
		);",
	)?;
	Ok(())
}

fn validate(v: &mut Validator, name: &str, email: &str, birthday: Option<DateOnly>) {
	v.check(!name.trim().is_empty(), "name", "must be provided");
	validate_str_len_chars(v, name, "name", 1, 100);
	validate_email(v, email);
	if let Some(day) = birthday {
		v.check(day <= DateOnly::today(), "birthday", "must not be in the future");
	}
}

/// Unique violations are the client's problem: report them per column.
fn constraint_error(err: rusqlite::Error) -> ApiError {
	match UniqueConstraintViolation::from_sqlite(&err) {
		Some(violation) => {
			let errors: BTreeMap<String, String> =
				violation.columns.iter().map(|c| (c.clone(), violation.message.clone())).collect();
			ApiError::FailedValidation(errors)
		}
		None => err.into(),
	}
}

fn find(pool: &SqlitePool, id: i64) -> ApiResult<Contact> {
	let conn = pool.get()?;
	conn.query_row(
		"SELECT id, name, email, birthday, version FROM contacts WHERE id = ?1",
		params![id],
		Contact::from_row,
	)
	.optional()?
	.ok_or(ApiError::NotFound)
}

#[post("/contacts", data = "<body>")]
fn create_contact(pool: &State<SqlitePool>, body: Result<JsonBody<NewContact>, ApiError>) -> ApiResult<JsonReply> {
	let JsonBody(input) = body?;
	let mut v = Validator::new();
	validate(&mut v, &input.name, &input.email, input.birthday);
	v.into_result()?;

	let conn = pool.get()?;
	let contact = conn
		.query_row(
			"INSERT INTO contacts (name, email, birthday) VALUES (?1, ?2, ?3)
			RETURNING id, name, email, birthday, version",
			params![input.name, input.email, input.birthday],
			Contact::from_row,
		)
		.map_err(constraint_error)?;
	tracing::info!(id = contact.id, "contact created");
	Ok(write_success(Status::Created, json!({ "contact": contact }))?)
}

#[get("/contacts/<id>")]
fn show_contact(pool: &State<SqlitePool>, id: Result<Id, ApiError>) -> ApiResult<JsonReply> {
	let contact = find(pool, id?.0)?;
	Ok(write_success(Status::Ok, json!({ "contact": contact }))?)
}

#[get("/contacts?<page>&<page_size>&<sort>")]
fn list_contacts(
	pool: &State<SqlitePool>,
	page: Option<&str>,
	page_size: Option<&str>,
	sort: Option<&str>,
) -> ApiResult<JsonReply> {
	let mut v = Validator::new();
	let page = read_int(page, "page", 1, &mut v);
	let page_size = read_int(page_size, "page_size", 20, &mut v);
	let sort = read_string(sort, "id");
	v.check(page >= 1, "page", "must be greater than zero");
	v.check(page_size >= 1 && page_size <= MAX_PAGE_SIZE, "page_size", "must be between 1 and 100");
	v.check(permitted_value(&sort.as_str(), &SORT_SAFELIST), "sort", "invalid sort value");
	v.into_result()?;

	let (column, direction) = match sort.strip_prefix('-') {
		Some(column) => (column, "DESC"),
		None => (sort.as_str(), "ASC"),
	};
	let conn = pool.get()?;
	let total: i64 = conn.query_row("SELECT count(*) FROM contacts", [], |row| row.get(0))?;
	let mut stmt = conn.prepare(&format!(
		"SELECT id, name, email, birthday, version FROM contacts
		ORDER BY {column} {direction}, id ASC LIMIT ?1 OFFSET ?2"
	))?;
	let contacts = stmt
		.query_map(params![page_size, (page - 1) * page_size], Contact::from_row)?
		.collect::<rusqlite::Result<Vec<_>>>()?;

	let last_page = if total == 0 { 0 } else { (total + page_size - 1) / page_size };
	Ok(write_success(
		Status::Ok,
		json!({
			"contacts": contacts,
			"metadata": {
				"current_page": page,
				"page_size": page_size,
				"last_page": last_page,
				"total_records": total,
			}
		}),
	)?)
}

#[patch("/contacts/<id>", data = "<body>")]
fn update_contact(
	pool: &State<SqlitePool>,
	id: Result<Id, ApiError>,
	body: Result<JsonBody<ContactPatch>, ApiError>,
) -> ApiResult<JsonReply> {
	let mut contact = find(pool, id?.0)?;
	let JsonBody(patch) = body?;
	if let Some(name) = patch.name {
		contact.name = name;
	}
	if let Some(email) = patch.email {
		contact.email = email;
	}
	if patch.birthday.is_some() {
		contact.birthday = patch.birthday;
	}

	let mut v = Validator::new();
	validate(&mut v, &contact.name, &contact.email, contact.birthday);
	v.into_result()?;

	let conn = pool.get()?;
	let version: Option<i64> = conn
		.query_row(
			"UPDATE contacts SET name = ?1, email = ?2, birthday = ?3, version = version + 1
			WHERE id = ?4 AND version = ?5 RETURNING version",
			params![contact.name, contact.email, contact.birthday, contact.id, contact.version],
			|row| row.get(0),
		)
		.optional()
		.map_err(constraint_error)?;
	contact.version = version.ok_or(ApiError::EditConflict)?;
	Ok(write_success(Status::Ok, json!({ "contact": contact }))?)
}

#[delete("/contacts/<id>")]
fn delete_contact(pool: &State<SqlitePool>, id: Result<Id, ApiError>) -> ApiResult<JsonReply> {
	let conn = pool.get()?;
	let deleted = conn.execute("DELETE FROM contacts WHERE id = ?1", params![id?.0])?;
	if deleted == 0 {
		return Err(ApiError::NotFound);
	}
	Ok(write_success(Status::Ok, json!({ "message": "contact successfully deleted" }))?)
}

pub fn routes() -> Vec<Route> {
	routes![create_contact, show_contact, list_contacts, update_contact, delete_contact]
}
