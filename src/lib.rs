pub mod cli;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod family;
pub mod insert;
pub mod io_utils;
pub mod mysql;
pub mod pipeline;
pub mod resolve;
pub mod rows;
pub mod sanitize;
pub mod source;
pub mod table;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, error, info};

use crate::{
    cli::{Cli, Commands, PipelineArgs},
    config::LoaderConfig,
    db::Destination,
    error::LoadError,
    family::{Family, Stage},
    pipeline::{LoadOptions, RunSummary, StageOutcome},
    table::Table,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match &cli.command {
        Commands::Lifestyle(args) => handle_family(&cli, &config, family::LIFESTYLE, args),
        Commands::Hotel(args) => match &args.table {
            Some(table) => handle_copy(&cli, &config, &args.path, table),
            None => handle_family(
                &cli,
                &config,
                family::HOTEL,
                &PipelineArgs {
                    dir: args.path.clone(),
                    summary_json: args.summary_json.clone(),
                },
            ),
        },
        Commands::Copy(args) => handle_copy(&cli, &config, &args.file, &args.table),
        Commands::Run(args) => handle_family(&cli, &config, &args.family, &args.pipeline),
        Commands::Stages(args) => handle_stages(&config, args.family.as_deref()),
    }
}

fn load_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::load(path)?,
        None => LoaderConfig::default(),
    };
    if cli.input_encoding.is_some() {
        config.input_encoding = cli.input_encoding.clone();
    }
    Ok(config)
}

fn connect(cli: &Cli, config: &LoaderConfig) -> Result<Box<dyn Destination>> {
    let url = config.database_url(cli.database.as_deref())?;
    let dest = db::connect(&url)
        .map_err(|err| LoadError::ConnectionFailure(err.to_string()))
        .with_context(|| format!("Connecting to {}", mysql::redact(&url)))?;
    Ok(dest)
}

fn load_options(cli: &Cli, config: &LoaderConfig) -> Result<LoadOptions> {
    config
        .load_options(cli.batch_size)
        .context("Resolving load options")
}

fn handle_family(cli: &Cli, config: &LoaderConfig, name: &str, args: &PipelineArgs) -> Result<()> {
    if !args.dir.is_dir() {
        bail!("Source directory {:?} does not exist or is not a directory", args.dir);
    }
    let family = config.family(name)?;
    let options = load_options(cli, config)?;
    let mut dest = connect(cli, config)?;
    let summary = pipeline::run_family(dest.as_mut(), &family, &args.dir, &options)
        .with_context(|| format!("Loading family '{}' from {:?}", family.name, args.dir))?;
    print_summary(&summary);
    if let Some(path) = &args.summary_json {
        write_summary_json(path, &summary)?;
    }
    if !summary.success {
        error!(
            "{} stage(s) of family '{}' reported failures",
            summary.failed, summary.family
        );
    }
    Ok(())
}

fn handle_copy(cli: &Cli, config: &LoaderConfig, file: &Path, table: &str) -> Result<()> {
    if !file.is_file() {
        bail!("Source file {file:?} does not exist or is not a file");
    }
    let options = load_options(cli, config)?;
    let mut dest = connect(cli, config)?;
    info!("Copying {file:?} into '{table}'");
    let outcome = pipeline::copy_file(dest.as_mut(), file, table, &options)
        .with_context(|| format!("Copying {file:?} into '{table}'"))?;
    let mut out = outcome_table();
    out.push_row(outcome_row(&outcome));
    out.print();
    for err in &outcome.errors {
        println!("  {}: {err}", outcome.stage);
    }
    Ok(())
}

fn handle_stages(config: &LoaderConfig, name: Option<&str>) -> Result<()> {
    let families = match name {
        Some(name) => vec![config.family(name)?],
        None => config
            .family_names()
            .iter()
            .map(|name| config.family(name))
            .collect::<Result<Vec<_>>>()?,
    };
    for (idx, family) in families.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        family
            .validate()
            .with_context(|| format!("Validating family '{}'", family.name))?;
        println!("Family '{}' ({} stage(s))", family.name, family.stages.len());
        stage_plan(family).print();
    }
    Ok(())
}

fn stage_plan(family: &Family) -> Table {
    let mut out = Table::new(&[
        "#", "source", "table", "auto", "produces", "consumes", "required",
    ])
    .align_right(&[0]);
    for (idx, stage) in family.stages.iter().enumerate() {
        out.push_row(vec![
            (idx + 1).to_string(),
            stage.source.clone(),
            stage.table.clone(),
            stage.auto_increment.clone().unwrap_or_default(),
            stage
                .produces
                .as_ref()
                .map(|output| format!("{} by {}", output.map, output.index_column))
                .unwrap_or_default(),
            describe_bindings(stage),
            if stage.required { "yes" } else { "no" }.to_string(),
        ]);
    }
    out
}

fn describe_bindings(stage: &Stage) -> String {
    stage
        .consumes
        .iter()
        .map(|binding| {
            format!(
                "{}.{} -> {}",
                binding.map, binding.index_column, binding.target_column
            )
        })
        .join(", ")
}

fn outcome_table() -> Table {
    Table::new(&["stage", "table", "status", "rows", "inserted", "errors"]).align_right(&[3, 4, 5])
}

fn outcome_row(outcome: &StageOutcome) -> Vec<String> {
    vec![
        outcome.stage.clone(),
        outcome.table.clone(),
        outcome.status.as_str().to_string(),
        outcome.rows_attempted.to_string(),
        outcome.rows_inserted.to_string(),
        outcome.errors.len().to_string(),
    ]
}

fn print_summary(summary: &RunSummary) {
    let mut out = outcome_table();
    for outcome in &summary.stages {
        out.push_row(outcome_row(outcome));
    }
    out.print();
    println!(
        "Family '{}': {} succeeded, {} failed, {} skipped in {:.2}s",
        summary.family,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.elapsed.as_secs_f64()
    );
    for (name, map) in &summary.maps {
        println!(
            "Map '{name}' ({}): {} key(s)",
            map.index_column(),
            map.len()
        );
    }
    for outcome in summary.stages.iter().filter(|o| !o.errors.is_empty()) {
        for err in &outcome.errors {
            println!("  {}: {err}", outcome.stage);
        }
    }
}

fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Serializing run summary")?;
    fs::write(path, json).with_context(|| format!("Writing run summary to {path:?}"))?;
    info!("Run summary written to {path:?}");
    Ok(())
}
