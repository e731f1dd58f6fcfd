//! ID resolution maps.
//!
//! Spreadsheets reference each other through synthetic index columns rather
//! than database keys. A key-producing stage records, for every row it
//! inserts, the row's synthetic index and the key the database assigned.
//! Consuming stages look their own index column up to fill a foreign key.
//!
//! A missing entry resolves to a null foreign key rather than an error. That
//! keeps a single failed parent row from aborting its dependents, but it also
//! means dependents of a failed parent are stored unlinked; check the run
//! summary for failed rows on producing stages.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use serde::{Serialize, Serializer};

use crate::{data::Value, error::LoadError};

/// Value of a synthetic index cell. Integral numbers normalize to `Int` no
/// matter how the sheet stored them, so `1`, `1.0` and `"1"` are one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceIndex {
    Int(i64),
    Text(String),
}

impl SourceIndex {
    /// Returns `None` for values that cannot key a map (missing cells).
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_missing() {
            return None;
        }
        let index = match value {
            Value::Integer(i) => SourceIndex::Int(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => SourceIndex::Int(*f as i64),
            Value::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(i) => SourceIndex::Int(i),
                    Err(_) => match trimmed.parse::<f64>() {
                        Ok(f) if f.is_finite() && f.fract() == 0.0 => SourceIndex::Int(f as i64),
                        _ => SourceIndex::Text(trimmed.to_string()),
                    },
                }
            }
            other => SourceIndex::Text(other.as_display()),
        };
        Some(index)
    }
}

impl From<i64> for SourceIndex {
    fn from(value: i64) -> Self {
        SourceIndex::Int(value)
    }
}

impl fmt::Display for SourceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceIndex::Int(i) => write!(f, "{i}"),
            SourceIndex::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Append-only mapping from synthetic index to generated key, kept in the
/// order rows were inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionMap {
    index_column: String,
    entries: Vec<(SourceIndex, i64)>,
    lookup: HashMap<SourceIndex, i64>,
}

impl ResolutionMap {
    pub fn new(index_column: &str) -> Self {
        Self {
            index_column: index_column.to_string(),
            ..Self::default()
        }
    }

    pub fn index_column(&self) -> &str {
        &self.index_column
    }

    pub fn record(&mut self, index: SourceIndex, key: i64) -> Result<(), LoadError> {
        if self.lookup.contains_key(&index) {
            return Err(LoadError::DuplicateIndex {
                column: self.index_column.clone(),
                index,
            });
        }
        self.lookup.insert(index.clone(), key);
        self.entries.push((index, key));
        Ok(())
    }

    pub fn resolve(&self, index: &SourceIndex) -> Option<i64> {
        self.lookup.get(index).copied()
    }

    pub fn entries(&self) -> &[(SourceIndex, i64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails on the first index that appears twice.
    pub fn ensure_unique<'a, I>(column: &str, indices: I) -> Result<(), LoadError>
    where
        I: IntoIterator<Item = &'a SourceIndex>,
    {
        let mut seen = HashSet::new();
        for index in indices {
            if !seen.insert(index) {
                return Err(LoadError::DuplicateIndex {
                    column: column.to_string(),
                    index: index.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Serialize for ResolutionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(index, key)| (index.to_string(), key)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MapState {
    Built(ResolutionMap),
    Unavailable,
}

/// How a consumer sees a map name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Built(&'a ResolutionMap),
    /// The producer was skipped or failed before inserting; every index
    /// resolves to a null key.
    Unavailable,
    /// No earlier stage registered the map at all: a wiring error.
    NeverRegistered,
}

impl Lookup<'_> {
    pub fn resolve(&self, index: &SourceIndex) -> Option<i64> {
        match self {
            Lookup::Built(map) => map.resolve(index),
            Lookup::Unavailable | Lookup::NeverRegistered => None,
        }
    }
}

/// Per-run registry of finished maps. A map enters the registry once its
/// producing stage is done and is only handed out by shared reference after
/// that.
#[derive(Debug, Clone, Default)]
pub struct ResolutionMaps {
    maps: BTreeMap<String, MapState>,
}

impl ResolutionMaps {
    pub fn publish(&mut self, name: &str, map: ResolutionMap) {
        self.maps.insert(name.to_string(), MapState::Built(map));
    }

    pub fn mark_unavailable(&mut self, name: &str) {
        self.maps.insert(name.to_string(), MapState::Unavailable);
    }

    pub fn lookup(&self, name: &str) -> Lookup<'_> {
        match self.maps.get(name) {
            Some(MapState::Built(map)) => Lookup::Built(map),
            Some(MapState::Unavailable) => Lookup::Unavailable,
            None => Lookup::NeverRegistered,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResolutionMap> {
        match self.maps.get(name) {
            Some(MapState::Built(map)) => Some(map),
            _ => None,
        }
    }

    pub fn into_built(self) -> BTreeMap<String, ResolutionMap> {
        self.maps
            .into_iter()
            .filter_map(|(name, state)| match state {
                MapState::Built(map) => Some((name, map)),
                MapState::Unavailable => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_index_normalizes_integral_values() {
        let expected = Some(SourceIndex::Int(1));
        assert_eq!(SourceIndex::from_value(&Value::Integer(1)), expected);
        assert_eq!(SourceIndex::from_value(&Value::Float(1.0)), expected);
        assert_eq!(SourceIndex::from_value(&Value::String(" 1 ".into())), expected);
        assert_eq!(SourceIndex::from_value(&Value::String("1.0".into())), expected);
        assert_eq!(
            SourceIndex::from_value(&Value::String("P-7".into())),
            Some(SourceIndex::Text("P-7".into()))
        );
        assert_eq!(SourceIndex::from_value(&Value::Float(f64::NAN)), None);
        assert_eq!(SourceIndex::from_value(&Value::String(String::new())), None);
    }

    #[test]
    fn record_rejects_duplicates_without_overwriting() {
        let mut map = ResolutionMap::new("product_index");
        map.record(0.into(), 10).unwrap();
        let err = map.record(0.into(), 11).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateIndex { ref column, .. } if column == "product_index"));
        assert_eq!(map.resolve(&0.into()), Some(10));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut map = ResolutionMap::new("rate_index");
        map.record(5.into(), 100).unwrap();
        map.record(2.into(), 101).unwrap();
        assert_eq!(
            map.entries(),
            &[(SourceIndex::Int(5), 100), (SourceIndex::Int(2), 101)]
        );
    }

    #[test]
    fn lookup_distinguishes_unavailable_from_unregistered() {
        let mut maps = ResolutionMaps::default();
        maps.mark_unavailable("rate");
        let mut lifestyle = ResolutionMap::new("product_index");
        lifestyle.record(0.into(), 7).unwrap();
        maps.publish("lifestyle", lifestyle);

        assert_eq!(maps.lookup("rate"), Lookup::Unavailable);
        assert_eq!(maps.lookup("nope"), Lookup::NeverRegistered);
        assert_eq!(maps.lookup("lifestyle").resolve(&0.into()), Some(7));
        assert_eq!(maps.lookup("lifestyle").resolve(&1.into()), None);
        assert_eq!(maps.into_built().len(), 1);
    }

    #[test]
    fn serializes_as_object_in_insertion_order() {
        let mut map = ResolutionMap::new("product_index");
        map.record(1.into(), 20).unwrap();
        map.record(0.into(), 21).unwrap();
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"1":20,"0":21}"#);
    }

    #[test]
    fn ensure_unique_reports_first_duplicate() {
        let indices = [SourceIndex::Int(0), SourceIndex::Int(1), SourceIndex::Int(0)];
        let err = ResolutionMap::ensure_unique("product_index", &indices).unwrap_err();
        assert!(err.to_string().contains("duplicate value 0"));
    }
}
