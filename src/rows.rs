//! In-memory row sets.
//!
//! A [`RowSet`] keeps its column names once and stores every row as a
//! positional vector aligned with them, so column order is preserved for
//! statement construction while lookups by name stay cheap.

use crate::data::Value;

pub type Cell = Option<Value>;
pub type Row = Vec<Cell>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a row set, padding short rows with absent cells and truncating
    /// long ones to the header width.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut set = Self::new(columns);
        for row in rows {
            set.push(row);
        }
        set
    }

    pub fn push(&mut self, mut row: Row) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }

    /// Iterates one column top to bottom. Yields nothing if the column is
    /// absent.
    pub fn column_values<'a>(&'a self, column: &str) -> impl Iterator<Item = Option<&'a Value>> {
        let idx = self.column_index(column);
        self.rows
            .iter()
            .filter(move |_| idx.is_some())
            .map(move |row| idx.and_then(|i| row[i].as_ref()))
    }

    /// Replaces a column's cells, appending the column when it does not exist
    /// yet. `values` must yield one cell per row.
    pub fn set_column<I>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = Cell>,
    {
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    /// Returns a copy without the named columns. Names that are not present
    /// are ignored.
    pub fn without_columns(&self, names: &[&str]) -> RowSet {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&idx| !names.contains(&self.columns[idx].as_str()))
            .collect();
        self.project(&keep)
    }

    /// Returns a copy without columns whose every cell is absent.
    pub fn without_empty_columns(&self) -> RowSet {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&idx| self.rows.iter().any(|row| row[idx].is_some()))
            .collect();
        self.project(&keep)
    }

    /// Applies `f` to every cell, producing a new row set.
    pub fn map_cells<F>(&self, mut f: F) -> RowSet
    where
        F: FnMut(&Cell) -> Cell,
    {
        RowSet {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().map(&mut f).collect())
                .collect(),
        }
    }

    fn project(&self, keep: &[usize]) -> RowSet {
        RowSet {
            columns: keep.iter().map(|&idx| self.columns[idx].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowSet {
        RowSet::from_rows(
            vec!["id".to_string(), "name".to_string(), "note".to_string()],
            vec![
                vec![Some(Value::Integer(1)), Some(Value::String("a".into())), None],
                vec![Some(Value::Integer(2)), None],
            ],
        )
    }

    #[test]
    fn from_rows_pads_short_rows() {
        let set = sample();
        assert_eq!(set.rows()[1].len(), 3);
        assert_eq!(set.get(1, "note"), None);
    }

    #[test]
    fn set_column_appends_missing_column() {
        let mut set = sample();
        set.set_column("fk", vec![Some(Value::Integer(10)), None]);
        assert_eq!(set.columns().last().map(String::as_str), Some("fk"));
        assert_eq!(set.get(0, "fk"), Some(&Value::Integer(10)));
        assert_eq!(set.get(1, "fk"), None);
    }

    #[test]
    fn set_column_replaces_existing_cells() {
        let mut set = sample();
        set.set_column("id", vec![Some(Value::Integer(7)), Some(Value::Integer(8))]);
        assert_eq!(set.columns().len(), 3);
        assert_eq!(set.get(1, "id"), Some(&Value::Integer(8)));
    }

    #[test]
    fn without_columns_keeps_order_of_remaining() {
        let set = sample().without_columns(&["id", "missing"]);
        assert_eq!(set.columns(), ["name".to_string(), "note".to_string()]);
    }

    #[test]
    fn without_empty_columns_drops_all_absent_columns() {
        let set = sample().without_empty_columns();
        assert_eq!(set.columns(), ["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn column_values_is_empty_for_unknown_column() {
        assert_eq!(sample().column_values("nope").count(), 0);
    }
}
