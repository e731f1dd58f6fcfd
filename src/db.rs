//! Destination database seam.
//!
//! The loader talks to the database only through [`Destination`]: one call
//! inserts a single row and hands back its generated key, the other writes a
//! whole batch as one multi-row statement. Every call is its own transaction,
//! so a failure never undoes work committed by earlier calls.
//!
//! [`SqliteDestination`] is the bundled backend and
//! [`MySqlDestination`](crate::mysql::MySqlDestination) the networked one;
//! [`connect`] picks between them by URL scheme. Destination tables must
//! already exist; the loader never issues DDL.

use std::path::Path;

use log::debug;
use rusqlite::{Connection, OpenFlags, params_from_iter, types::Value as SqlValue};
use thiserror::Error;

use crate::{data::Value, mysql::MySqlDestination, rows::Row};

/// Compile-time default of `SQLITE_MAX_VARIABLE_NUMBER` in the bundled library.
const SQLITE_MAX_VARIABLES: usize = 32_766;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Connect(String),
    #[error("nothing to insert into '{0}': the row set has no columns")]
    NoColumns(String),
    #[error("generated key {key} for '{table}' does not fit in a signed 64-bit integer")]
    KeyOutOfRange { table: String, key: u64 },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    MySql(#[from] sqlx::Error),
}

/// SQL flavour of a backend: identifier quoting and the all-defaults insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    fn default_values(self) -> &'static str {
        match self {
            Dialect::Sqlite => "DEFAULT VALUES",
            Dialect::MySql => "() VALUES ()",
        }
    }
}

/// Opens the destination named by `url`. `mysql://` and `mariadb://` URLs go
/// to a MySQL server; `sqlite:` URLs and bare paths open a SQLite file.
pub fn connect(url: &str) -> Result<Box<dyn Destination>, DbError> {
    let trimmed = url.trim();
    match trimmed.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase()) {
        Some(scheme) if scheme == "mysql" || scheme == "mariadb" => {
            Ok(Box::new(MySqlDestination::connect(trimmed)?))
        }
        _ => Ok(Box::new(SqliteDestination::open(trimmed)?)),
    }
}

pub trait Destination {
    /// Round-trips a trivial query to prove the connection is usable.
    fn ping(&mut self) -> Result<(), DbError>;

    /// Inserts one row and returns the key the database generated for it.
    /// An empty column list inserts a row made of column defaults.
    fn insert_returning_key(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[&Value],
    ) -> Result<i64, DbError>;

    /// Inserts `rows` (aligned with `columns`) as a single statement.
    fn insert_batch(&mut self, table: &str, columns: &[String], rows: &[Row])
    -> Result<usize, DbError>;

    /// Upper bound on bind parameters per statement, if the backend has one.
    fn max_bind_parameters(&self) -> Option<usize> {
        None
    }
}

pub struct SqliteDestination {
    conn: Connection,
}

impl SqliteDestination {
    /// Opens an existing database. Accepts `sqlite://<path>`, `sqlite:<path>`
    /// or a bare path; the file is never created.
    pub fn open(url: &str) -> Result<Self, DbError> {
        let path = sqlite_path(url)?;
        debug!("Opening SQLite database {path:?}");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|err| DbError::Connect(format!("cannot open {path:?}: {err}")))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn sqlite_path(url: &str) -> Result<&Path, DbError> {
    let trimmed = url.trim();
    let path = if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        rest
    } else if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(DbError::Connect(format!(
            "unsupported database scheme '{scheme}'"
        )));
    } else {
        trimmed
    };
    if path.is_empty() {
        return Err(DbError::Connect("empty database path".to_string()));
    }
    Ok(Path::new(path))
}

impl Destination for SqliteDestination {
    fn ping(&mut self) -> Result<(), DbError> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|err| DbError::Connect(err.to_string()))
    }

    fn insert_returning_key(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[&Value],
    ) -> Result<i64, DbError> {
        let sql = single_row_sql(Dialect::Sqlite, table, columns);
        let tx = self.conn.transaction()?;
        tx.execute(&sql, params_from_iter(values.iter().map(|value| to_sql(value))))?;
        let key = tx.last_insert_rowid();
        tx.commit()?;
        Ok(key)
    }

    fn insert_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<usize, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(DbError::NoColumns(table.to_string()));
        }
        let sql = batch_sql(Dialect::Sqlite, table, columns, rows.len());
        let params = rows.iter().flat_map(|row| {
            row.iter().map(|cell| match cell {
                Some(value) => to_sql(value),
                None => SqlValue::Null,
            })
        });
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(&sql, params_from_iter(params))?;
        tx.commit()?;
        Ok(inserted)
    }

    fn max_bind_parameters(&self) -> Option<usize> {
        Some(SQLITE_MAX_VARIABLES)
    }
}

fn column_list<S: AsRef<str>>(dialect: Dialect, columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_identifier(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    format!("({})", vec!["?"; count].join(", "))
}

pub fn single_row_sql(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    let table = dialect.quote_identifier(table);
    if columns.is_empty() {
        return format!("INSERT INTO {table} {}", dialect.default_values());
    }
    format!(
        "INSERT INTO {table} ({}) VALUES {}",
        column_list(dialect, columns),
        placeholders(columns.len())
    )
}

pub fn batch_sql(dialect: Dialect, table: &str, columns: &[String], row_count: usize) -> String {
    let row = placeholders(columns.len());
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote_identifier(table),
        column_list(dialect, columns),
        vec![row.as_str(); row_count].join(", ")
    )
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) if f.is_nan() => SqlValue::Null,
        Value::Float(f) => SqlValue::Real(*f),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Date(_) | Value::DateTime(_) => SqlValue::Text(value.as_display()),
    }
}
