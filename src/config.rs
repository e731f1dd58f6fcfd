use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    family::{self, Family},
    insert::DEFAULT_BATCH_SIZE,
    io_utils,
    pipeline::LoadOptions,
    source::ReadOptions,
};

/// Environment variable consulted for the database URL when `--database` is
/// not given.
pub const DATABASE_ENV: &str = "SHEET_LOADER_DATABASE";

/// Settings read from the optional YAML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub input_encoding: Option<String>,
    /// Declared families; a name shared with a built-in replaces it.
    #[serde(default)]
    pub families: Vec<Family>,
}

impl LoaderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading configuration file {path:?}"))?;
        Self::from_yaml_str(&raw).with_context(|| format!("Parsing configuration file {path:?}"))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: LoaderConfig = serde_yaml::from_str(raw)?;
        if let Some(size) = config.batch_size {
            ensure!(size > 0, "batch_size must be positive");
        }
        Ok(config)
    }

    /// `override_url` is the value from the command line or environment,
    /// which wins over the file.
    pub fn database_url(&self, override_url: Option<&str>) -> Result<String> {
        override_url
            .map(str::to_string)
            .or_else(|| self.database.clone())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("No database configured; pass --database, set {DATABASE_ENV}, or add 'database' to the config file")
            })
    }

    pub fn load_options(&self, batch_size: Option<usize>) -> Result<LoadOptions> {
        let batch_size = batch_size.or(self.batch_size).unwrap_or(DEFAULT_BATCH_SIZE);
        ensure!(batch_size > 0, "batch size must be positive");
        let encoding = io_utils::resolve_encoding(self.input_encoding.as_deref())?;
        Ok(LoadOptions {
            batch_size,
            read: ReadOptions {
                encoding,
                ..ReadOptions::default()
            },
        })
    }

    pub fn family(&self, name: &str) -> Result<Family> {
        self.families
            .iter()
            .find(|family| family.name == name)
            .cloned()
            .or_else(|| Family::builtin(name))
            .ok_or_else(|| {
                anyhow!(
                    "Unknown family '{name}' (known: {})",
                    self.family_names().join(", ")
                )
            })
    }

    pub fn family_names(&self) -> Vec<String> {
        let mut names = vec![family::LIFESTYLE.to_string(), family::HOTEL.to_string()];
        for declared in &self.families {
            if !names.contains(&declared.name) {
                names.push(declared.name.clone());
            }
        }
        names
    }
}
