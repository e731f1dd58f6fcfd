//! Pipeline orchestrator.
//!
//! Runs a family's stages strictly in declared order on the calling thread.
//! For each stage the source is read, foreign keys are bound from maps that
//! earlier stages published, the rows are sanitized, and they are written
//! either row by row (key-producing stages, whose keys become a new map) or in
//! batches. Stage-level problems become a [`StageOutcome`]; only a connection
//! failure, an invalid family, or a missing required source stop the run.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Serialize, Serializer};

use crate::{
    data::Value,
    db::Destination,
    error::LoadError,
    family::{Family, Stage},
    insert::{self, DEFAULT_BATCH_SIZE},
    resolve::{Lookup, ResolutionMap, ResolutionMaps, SourceIndex},
    rows::{Cell, RowSet},
    sanitize::sanitize,
    source::{self, ReadOptions},
};

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub read: ReadOptions,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            read: ReadOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub table: String,
    pub status: StageStatus,
    pub source: Option<PathBuf>,
    pub rows_attempted: usize,
    pub rows_inserted: usize,
    #[serde(serialize_with = "errors_as_strings")]
    pub errors: Vec<LoadError>,
}

impl StageOutcome {
    fn new(stage: &Stage, source: Option<&Path>) -> Self {
        Self {
            stage: stage.source.clone(),
            table: stage.table.clone(),
            status: StageStatus::Skipped,
            source: source.map(Path::to_path_buf),
            rows_attempted: 0,
            rows_inserted: 0,
            errors: Vec::new(),
        }
    }

    fn failed(mut self, err: LoadError) -> Self {
        error!("{}: {err}", self.stage);
        self.errors.push(err);
        self.status = StageStatus::Failed;
        self
    }

    fn finish(mut self) -> Self {
        self.status = if self.errors.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        self
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub family: String,
    pub success: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(rename = "elapsed_seconds", serialize_with = "duration_as_secs")]
    pub elapsed: Duration,
    pub stages: Vec<StageOutcome>,
    pub maps: BTreeMap<String, ResolutionMap>,
}

impl RunSummary {
    fn new(
        family: &str,
        stages: Vec<StageOutcome>,
        maps: BTreeMap<String, ResolutionMap>,
        elapsed: Duration,
    ) -> Self {
        let count = |status| stages.iter().filter(|s| s.status == status).count();
        let succeeded = count(StageStatus::Completed);
        let failed = count(StageStatus::Failed);
        let skipped = count(StageStatus::Skipped);
        Self {
            family: family.to_string(),
            success: failed == 0,
            succeeded,
            failed,
            skipped,
            elapsed,
            stages,
            maps,
        }
    }

    pub fn map(&self, name: &str) -> Option<&ResolutionMap> {
        self.maps.get(name)
    }

    pub fn stage(&self, source: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|outcome| outcome.stage == source)
    }
}

fn errors_as_strings<S: Serializer>(errors: &[LoadError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

fn duration_as_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Loads every stage of `family` from `dir`.
pub fn run_family(
    dest: &mut dyn Destination,
    family: &Family,
    dir: &Path,
    options: &LoadOptions,
) -> Result<RunSummary, LoadError> {
    family.validate()?;
    dest.ping()
        .map_err(|err| LoadError::ConnectionFailure(err.to_string()))?;
    info!(
        "Loading family '{}' ({} stage(s)) from {:?}",
        family.name,
        family.stages.len(),
        dir
    );

    let started = Instant::now();
    let mut maps = ResolutionMaps::default();
    let mut outcomes = Vec::with_capacity(family.stages.len());
    for (position, stage) in family.stages.iter().enumerate() {
        info!(
            "Stage {}/{}: {} -> {}",
            position + 1,
            family.stages.len(),
            stage.source,
            stage.table
        );
        let path = match source::locate(dir, &stage.source) {
            Ok(path) => path,
            Err(err) if stage.required => {
                error!("{}: required source missing, aborting run", stage.source);
                return Err(err);
            }
            Err(err) => {
                warn!("{}: {err}, skipping", stage.source);
                if let Some(output) = &stage.produces {
                    maps.mark_unavailable(&output.map);
                }
                outcomes.push(StageOutcome::new(stage, None));
                continue;
            }
        };
        outcomes.push(run_stage(dest, stage, &path, &mut maps, options));
    }

    let summary = RunSummary::new(&family.name, outcomes, maps.into_built(), started.elapsed());
    info!(
        "Family '{}' finished in {:.2}s: {} succeeded, {} failed, {} skipped",
        summary.family,
        summary.elapsed.as_secs_f64(),
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
    Ok(summary)
}

/// Copies one file into `table` in batches, without any key remapping. Only
/// the conventional `id` auto-increment column is stripped.
pub fn copy_file(
    dest: &mut dyn Destination,
    path: &Path,
    table: &str,
    options: &LoadOptions,
) -> Result<StageOutcome, LoadError> {
    if !path.is_file() {
        return Err(LoadError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    dest.ping()
        .map_err(|err| LoadError::ConnectionFailure(err.to_string()))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(table);
    let stage = Stage::new(stem, table).auto_increment("id");
    let mut maps = ResolutionMaps::default();
    Ok(run_stage(dest, &stage, path, &mut maps, options))
}

/// Runs a single stage against an already located source. Maps the stage
/// consumes must have been registered in `maps` by earlier stages.
pub fn run_stage(
    dest: &mut dyn Destination,
    stage: &Stage,
    path: &Path,
    maps: &mut ResolutionMaps,
    options: &LoadOptions,
) -> StageOutcome {
    let mut outcome = StageOutcome::new(stage, Some(path));
    let withdraw = |maps: &mut ResolutionMaps| {
        if let Some(output) = &stage.produces {
            maps.mark_unavailable(&output.map);
        }
    };

    let rows = match source::read_row_set(path, &options.read) {
        Ok(rows) => rows,
        Err(err) => {
            withdraw(maps);
            return outcome.failed(err);
        }
    };
    outcome.rows_attempted = rows.len();
    info!("{}: found {} row(s)", stage.source, rows.len());

    let rows = match bind_foreign_keys(&rows, stage, maps) {
        Ok(rows) => rows,
        Err(err) => {
            withdraw(maps);
            return outcome.failed(err);
        }
    };
    let clean = sanitize(&rows, stage);

    match &stage.produces {
        Some(output) => {
            let indices = source_indices(&rows, &output.index_column);
            let known = indices.iter().flatten();
            if let Err(err) = ResolutionMap::ensure_unique(&output.index_column, known) {
                withdraw(maps);
                return outcome.failed(err);
            }
            let report = insert::insert_rows(dest, &stage.table, &clean);
            let mut map = ResolutionMap::new(&output.index_column);
            for (index, key) in indices.into_iter().zip(report.keys.iter()) {
                if let (Some(index), Some(key)) = (index, key) {
                    if let Err(err) = map.record(index, *key) {
                        outcome.errors.push(err);
                    }
                }
            }
            info!(
                "{}: inserted {}/{} row(s), map '{}' holds {} key(s)",
                stage.source,
                report.inserted(),
                rows.len(),
                output.map,
                map.len()
            );
            outcome.rows_inserted = report.inserted();
            outcome.errors.extend(report.failures);
            maps.publish(&output.map, map);
        }
        None => {
            let report = insert::insert_batches(dest, &stage.table, &clean, options.batch_size);
            info!(
                "{}: inserted {}/{} row(s) in {} statement(s)",
                stage.source,
                report.inserted,
                rows.len(),
                report.statements
            );
            outcome.rows_inserted = report.inserted;
            outcome.errors.extend(report.failures);
        }
    }
    outcome.finish()
}

/// Fills each binding's target column from its map. Rows whose index is
/// absent, or not present in the map, get a null foreign key. The input is
/// left as read so index columns stay available to the caller.
pub fn bind_foreign_keys(
    rows: &RowSet,
    stage: &Stage,
    maps: &ResolutionMaps,
) -> Result<RowSet, LoadError> {
    let mut bound = rows.clone();
    for binding in &stage.consumes {
        let lookup = maps.lookup(&binding.map);
        if matches!(lookup, Lookup::NeverRegistered) {
            return Err(LoadError::UnresolvedDependency {
                stage: stage.source.clone(),
                map: binding.map.clone(),
            });
        }
        if !rows.has_column(&binding.index_column) {
            debug!(
                "{}: no '{}' column, '{}' left as read",
                stage.source, binding.index_column, binding.target_column
            );
            continue;
        }
        let mut unresolved = 0usize;
        let keys: Vec<Cell> = rows
            .column_values(&binding.index_column)
            .map(|cell| {
                let index = cell.and_then(SourceIndex::from_value)?;
                let key = lookup.resolve(&index);
                if key.is_none() {
                    unresolved += 1;
                }
                key.map(Value::Integer)
            })
            .collect();
        if unresolved > 0 {
            warn!(
                "{}: {unresolved} row(s) reference '{}' values with no key in map '{}'; '{}' left null",
                stage.source, binding.index_column, binding.map, binding.target_column
            );
        }
        debug!(
            "{}: bound '{}' from map '{}' for {} row(s)",
            stage.source,
            binding.target_column,
            binding.map,
            rows.len() - unresolved
        );
        bound.set_column(&binding.target_column, keys);
    }
    Ok(bound)
}

/// Index of every row in a producing stage. A null cell yields `None`, so the
/// row is inserted without a map entry. Sources without the column fall back
/// to the zero-based row position.
fn source_indices(rows: &RowSet, column: &str) -> Vec<Option<SourceIndex>> {
    if !rows.has_column(column) {
        return (0..rows.len() as i64).map(|position| Some(SourceIndex::Int(position))).collect();
    }
    rows.column_values(column)
        .map(|cell| cell.and_then(SourceIndex::from_value))
        .collect()
}
