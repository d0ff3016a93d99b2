use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::rusqlite::{self, ErrorCode};
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;
use tracing::info;

use crate::config::SqlDbConfig;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// How long opening a connection (including the startup ping) may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DbError {
	#[error(transparent)]
	Pool(#[from] r2d2::Error),
	#[error(transparent)]
	Sqlite(#[from] rusqlite::Error),
}

/// Opens a pool sized by `config` and checks the database answers.
pub fn open_pool(config: &SqlDbConfig) -> Result<SqlitePool, DbError> {
	let manager = match config.dsn.as_str() {
		"" | ":memory:" => SqliteConnectionManager::memory(),
		path => SqliteConnectionManager::file(path),
	}
	.with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));

	let max_size = config.max_open_conns.max(1);
	let pool = Pool::builder()
		.max_size(max_size)
		.min_idle(Some(config.max_idle_conns.min(max_size)))
		.idle_timeout(Some(config.max_idle_time))
		.connection_timeout(CONNECT_TIMEOUT)
		.build(manager)?;

	let conn = pool.get()?;
	conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
	info!(dsn = %config.dsn, max_open = max_size, "database pool ready");
	Ok(pool)
}

/// A unique constraint violation, independent of the database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UniqueConstraintViolation {
	pub table: String,
	pub columns: Vec<String>,
	pub message: String,
}

impl UniqueConstraintViolation {
	pub fn new(table: &str, column: &str, more: &[&str]) -> Self {
		let mut columns = vec![column.to_string()];
		columns.extend(more.iter().map(|c| c.to_string()));
		let message = if columns.len() > 1 {
			"a record already exists for these fields"
		} else {
			"a record already exists for this field"
		};
		Self { table: table.to_string(), columns, message: message.to_string() }
	}

	/// Recognises SQLite's "UNIQUE constraint failed: table.col, table.col2".
	pub fn from_sqlite(err: &rusqlite::Error) -> Option<Self> {
		let rusqlite::Error::SqliteFailure(code, Some(msg)) = err else {
			return None;
		};
		if code.code != ErrorCode::ConstraintViolation {
			return None;
		}
		let targets = msg.strip_prefix("UNIQUE constraint failed: ")?;
		let mut table = String::new();
		let columns: Vec<&str> = targets
			.split(',')
			.filter_map(|target| {
				let (t, c) = target.trim().split_once('.')?;
				table = t.to_string();
				Some(c)
			})
			.collect();
		let (first, rest) = columns.split_first()?;
		Some(Self::new(&table, first, rest))
	}
}
