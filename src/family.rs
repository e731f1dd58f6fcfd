//! Entity families and their ordered stages.
//!
//! A [`Family`] is a fixed, dependency-ordered list of [`Stage`]s. Stages that
//! produce generated keys publish them under a map name; later stages bind one
//! of their synthetic index columns to such a map to fill a foreign-key
//! column. The two built-in catalogs mirror the spreadsheet exports the loader
//! was written for; further families can be declared in the configuration
//! file with the same shape.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

pub const LIFESTYLE: &str = "lifestyle";
pub const HOTEL: &str = "hotel";

/// Map names published by the lifestyle family.
pub const LIFESTYLE_MAP: &str = "lifestyle";
pub const RATE_MAP: &str = "rate";

const LIFESTYLE_INDEX_COLUMNS: &[&str] = &["product_index", "rate_index"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeyOutput {
    /// Name later stages use to refer to this map.
    pub map: String,
    /// Synthetic column whose value keys each generated id.
    pub index_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeyBinding {
    pub map: String,
    pub index_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    /// File stem looked up in the source directory.
    pub source: String,
    pub table: String,
    #[serde(default)]
    pub auto_increment: Option<String>,
    #[serde(default)]
    pub index_columns: Vec<String>,
    #[serde(default)]
    pub produces: Option<KeyOutput>,
    #[serde(default)]
    pub consumes: Vec<ForeignKeyBinding>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub drop_empty_columns: bool,
}

impl Stage {
    pub fn new(source: &str, table: &str) -> Self {
        Self {
            source: source.to_string(),
            table: table.to_string(),
            auto_increment: None,
            index_columns: Vec::new(),
            produces: None,
            consumes: Vec::new(),
            required: false,
            drop_empty_columns: false,
        }
    }

    pub fn auto_increment(mut self, column: &str) -> Self {
        self.auto_increment = Some(column.to_string());
        self
    }

    pub fn index_columns(mut self, columns: &[&str]) -> Self {
        self.index_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn produces(mut self, map: &str, index_column: &str) -> Self {
        self.produces = Some(KeyOutput {
            map: map.to_string(),
            index_column: index_column.to_string(),
        });
        self
    }

    pub fn consumes(mut self, map: &str, index_column: &str, target_column: &str) -> Self {
        self.consumes.push(ForeignKeyBinding {
            map: map.to_string(),
            index_column: index_column.to_string(),
            target_column: target_column.to_string(),
        });
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn drop_empty_columns(mut self) -> Self {
        self.drop_empty_columns = true;
        self
    }

    pub fn is_key_producing(&self) -> bool {
        self.produces.is_some()
    }

    /// Every column the sanitizer removes: the auto-increment column plus all
    /// synthetic index columns, including those named by key bindings.
    pub fn stripped_columns(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.auto_increment
            .iter()
            .chain(self.index_columns.iter())
            .chain(self.produces.iter().map(|output| &output.index_column))
            .chain(self.consumes.iter().map(|binding| &binding.index_column))
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Family {
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Family {
    /// Product, rates and their dependents. Keys generated for
    /// `tbl_lifestyle` and `tbl_lifestyle_rates` are fed forward through the
    /// `lifestyle` and `rate` maps.
    pub fn lifestyle() -> Self {
        let stage = |source: &str, auto: &str| {
            Stage::new(source, source)
                .auto_increment(auto)
                .index_columns(LIFESTYLE_INDEX_COLUMNS)
        };
        Family {
            name: LIFESTYLE.to_string(),
            stages: vec![
                stage("tbl_lifestyle", "lifestyle_id")
                    .produces(LIFESTYLE_MAP, "product_index")
                    .required(),
                stage("tbl_lifestyle_detail", "lifestyle_detail_id").consumes(
                    LIFESTYLE_MAP,
                    "product_index",
                    "lifestyle_id",
                ),
                stage("tbl_lifestyle_rates", "lifestyle_rate_id")
                    .consumes(LIFESTYLE_MAP, "product_index", "lifestyle_id")
                    .produces(RATE_MAP, "rate_index"),
                stage("life_style_rates_packages", "id").consumes(RATE_MAP, "rate_index", "rate_id"),
                stage("tbl_lifestyle_inventory", "lifestyle_inventory_id")
                    .consumes(LIFESTYLE_MAP, "product_index", "lifestyle_id")
                    .consumes(RATE_MAP, "rate_index", "rate_id"),
                stage("tbl_lifestyle_terms_and_conditions", "termsncondition_id").consumes(
                    LIFESTYLE_MAP,
                    "product_index",
                    "lifestyle_id",
                ),
            ],
        }
    }

    /// Hotel contract tables. Flat copy: no keys are fed forward.
    pub fn hotel() -> Self {
        const TABLES: &[&str] = &[
            "hotels",
            "hotel_details",
            "hotel_room_categories",
            "hotel_room_types",
            "hotel_room_rates",
            "hotel_terms_conditions",
            "hotel_room_inventories",
            "hotel_room_daily_inventories",
        ];
        let stages = TABLES
            .iter()
            .enumerate()
            .map(|(idx, table)| {
                let stage = Stage::new(table, table)
                    .auto_increment("id")
                    .drop_empty_columns();
                if idx == 0 { stage.required() } else { stage }
            })
            .collect();
        Family {
            name: HOTEL.to_string(),
            stages,
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            LIFESTYLE => Some(Self::lifestyle()),
            HOTEL => Some(Self::hotel()),
            _ => None,
        }
    }

    pub fn produced_maps(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|stage| stage.produces.as_ref().map(|output| output.map.as_str()))
            .collect()
    }

    /// Checks that the stage order satisfies every key dependency: each map is
    /// produced once, and only consumed by stages after its producer.
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |message: String| LoadError::InvalidFamily {
            family: self.name.clone(),
            message,
        };
        if self.stages.is_empty() {
            return Err(invalid("no stages declared".to_string()));
        }
        let mut sources = HashSet::new();
        let mut available: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if !sources.insert(stage.source.as_str()) {
                return Err(invalid(format!("source '{}' listed twice", stage.source)));
            }
            for binding in &stage.consumes {
                if !available.contains(binding.map.as_str()) {
                    return Err(invalid(format!(
                        "stage '{}' consumes map '{}' before any stage produces it",
                        stage.source, binding.map
                    )));
                }
            }
            if let Some(output) = &stage.produces {
                if !available.insert(output.map.as_str()) {
                    return Err(invalid(format!(
                        "map '{}' is produced by more than one stage",
                        output.map
                    )));
                }
            }
        }
        Ok(())
    }
}
