//! Column sanitizer.
//!
//! Produces the row set that is actually written: the stage's auto-increment
//! column and synthetic index columns removed, missing values turned into
//! absent cells. The input is never modified, since the orchestrator still
//! needs the index columns of the input for key bookkeeping.

use crate::{family::Stage, rows::RowSet};

pub fn sanitize(rows: &RowSet, stage: &Stage) -> RowSet {
    let stripped = rows.without_columns(&stage.stripped_columns());
    let normalized = normalize_missing(&stripped);
    if stage.drop_empty_columns {
        normalized.without_empty_columns()
    } else {
        normalized
    }
}

/// Replaces NaN floats and empty strings with absent cells.
pub fn normalize_missing(rows: &RowSet) -> RowSet {
    rows.map_cells(|cell| match cell {
        Some(value) if value.is_missing() => None,
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Value, family::Family};

    fn detail_rows() -> RowSet {
        RowSet::from_rows(
            vec![
                "lifestyle_detail_id".into(),
                "product_index".into(),
                "rate_index".into(),
                "lifestyle_id".into(),
                "description".into(),
                "rating".into(),
            ],
            vec![vec![
                Some(Value::Integer(99)),
                Some(Value::Integer(0)),
                None,
                Some(Value::Integer(12)),
                Some(Value::String(String::new())),
                Some(Value::Float(f64::NAN)),
            ]],
        )
    }

    #[test]
    fn sanitize_strips_configured_columns_only() {
        let stage = &Family::lifestyle().stages[1];
        let clean = sanitize(&detail_rows(), stage);
        assert_eq!(
            clean.columns(),
            ["lifestyle_id".to_string(), "description".to_string(), "rating".to_string()]
        );
        assert_eq!(clean.rows()[0], vec![Some(Value::Integer(12)), None, None]);
    }

    #[test]
    fn sanitize_leaves_input_untouched() {
        let rows = detail_rows();
        let stage = &Family::lifestyle().stages[1];
        let _ = sanitize(&rows, stage);
        assert_eq!(rows.columns().len(), 6);
        assert!(rows.has_column("product_index"));
        assert!(matches!(rows.get(0, "rating"), Some(Value::Float(f)) if f.is_nan()));
        assert_eq!(rows.get(0, "description"), Some(&Value::String(String::new())));
    }

    #[test]
    fn sanitize_drops_empty_columns_when_configured() {
        let stage = &Family::hotel().stages[0];
        let rows = RowSet::from_rows(
            vec!["id".into(), "name".into(), "unused".into()],
            vec![vec![
                Some(Value::Integer(1)),
                Some(Value::String("Grand".into())),
                Some(Value::String(String::new())),
            ]],
        );
        let clean = sanitize(&rows, stage);
        assert_eq!(clean.columns(), ["name".to_string()]);
    }
}
