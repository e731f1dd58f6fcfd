#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use sheet_loader::{
    data::Value,
    db::{DbError, Destination, SqliteDestination},
    rows::Row,
};
use tempfile::{TempDir, tempdir};

pub const LIFESTYLE_SCHEMA: &str = r#"
CREATE TABLE tbl_lifestyle (
    lifestyle_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    city TEXT
);
CREATE TABLE tbl_lifestyle_detail (
    lifestyle_detail_id INTEGER PRIMARY KEY AUTOINCREMENT,
    lifestyle_id INTEGER REFERENCES tbl_lifestyle(lifestyle_id),
    description TEXT
);
CREATE TABLE tbl_lifestyle_rates (
    lifestyle_rate_id INTEGER PRIMARY KEY AUTOINCREMENT,
    lifestyle_id INTEGER REFERENCES tbl_lifestyle(lifestyle_id),
    label TEXT,
    price REAL
);
CREATE TABLE life_style_rates_packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rate_id INTEGER REFERENCES tbl_lifestyle_rates(lifestyle_rate_id),
    package TEXT
);
CREATE TABLE tbl_lifestyle_inventory (
    lifestyle_inventory_id INTEGER PRIMARY KEY AUTOINCREMENT,
    lifestyle_id INTEGER REFERENCES tbl_lifestyle(lifestyle_id),
    rate_id INTEGER REFERENCES tbl_lifestyle_rates(lifestyle_rate_id),
    inventory_date TEXT,
    slots INTEGER
);
CREATE TABLE tbl_lifestyle_terms_and_conditions (
    termsncondition_id INTEGER PRIMARY KEY AUTOINCREMENT,
    lifestyle_id INTEGER REFERENCES tbl_lifestyle(lifestyle_id),
    terms TEXT
);
"#;

pub const HOTEL_TABLES: &[&str] = &[
    "hotels",
    "hotel_details",
    "hotel_room_categories",
    "hotel_room_types",
    "hotel_room_rates",
    "hotel_terms_conditions",
    "hotel_room_inventories",
    "hotel_room_daily_inventories",
];

pub fn hotel_schema() -> String {
    let mut sql = String::from(
        "CREATE TABLE hotels (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, city TEXT, stars INTEGER);\n",
    );
    for table in &HOTEL_TABLES[1..] {
        sql.push_str(&format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, hotel_id INTEGER, name TEXT, note TEXT);\n"
        ));
    }
    sql
}

/// Cell written into an xlsx fixture.
#[derive(Debug, Clone)]
pub enum Xl {
    N(f64),
    S(&'static str),
    Blank,
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a single-sheet workbook with a header row.
    pub fn write_xlsx(&self, name: &str, headers: &[&str], rows: &[Vec<Xl>]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in headers.iter().enumerate() {
            sheet
                .write_string(0, col as u16, *header)
                .expect("write header");
        }
        for (row_idx, row) in rows.iter().enumerate() {
            let r = row_idx as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let c = col as u16;
                match cell {
                    Xl::N(n) => {
                        sheet.write_number(r, c, *n).expect("write number");
                    }
                    Xl::S(s) => {
                        sheet.write_string(r, c, *s).expect("write string");
                    }
                    Xl::Blank => {}
                }
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }

    /// Creates an SQLite database under the workspace with `schema` applied.
    pub fn database(&self, name: &str, schema: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let conn = Connection::open(&path).expect("create database");
        conn.execute_batch(schema).expect("apply schema");
        path
    }

    /// Creates a subdirectory for source files.
    pub fn dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("create source dir");
        path
    }
}

pub fn open(path: &Path) -> SqliteDestination {
    SqliteDestination::open(path.to_str().expect("utf-8 path")).expect("open database")
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

/// Destination wrapper that counts the statements it forwards.
pub struct Recording<D> {
    pub inner: D,
    pub single_rows: usize,
    pub batches: Vec<usize>,
}

impl<D> Recording<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            single_rows: 0,
            batches: Vec::new(),
        }
    }
}

impl<D: Destination> Destination for Recording<D> {
    fn ping(&mut self) -> Result<(), DbError> {
        self.inner.ping()
    }

    fn insert_returning_key(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[&Value],
    ) -> Result<i64, DbError> {
        self.single_rows += 1;
        self.inner.insert_returning_key(table, columns, values)
    }

    fn insert_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<usize, DbError> {
        self.batches.push(rows.len());
        self.inner.insert_batch(table, columns, rows)
    }

    fn max_bind_parameters(&self) -> Option<usize> {
        self.inner.max_bind_parameters()
    }
}
