mod classfile;
mod config;
mod descriptor;
mod endpoint;
mod error;
#[cfg(test)]
mod fixtures;
mod ir;
mod matcher;
mod opcodes;
mod openapi;
mod repository;
mod scan;
mod schema;
mod types;
mod validation;
mod walker;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::endpoint::EndpointExtractor;
use crate::openapi::{Document, build_document};
use crate::repository::{ClassRecord, ClassRepository};
use crate::scan::scan_input;

const DEFAULT_CONFIG: &str = "classdoc.toml";

/// CLI arguments for classdoc execution.
#[derive(Parser, Debug)]
#[command(
    name = "classdoc",
    about = "Recover an OpenAPI document from compiled Spring controllers.",
    version
)]
struct Cli {
    /// Class directory, class file, or (nested) JAR to analyze.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Settings file; `classdoc.toml` in the working directory is used when present.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long = "controller-package", value_name = "PACKAGE")]
    controller_packages: Vec<String>,
    #[arg(long = "type-package", value_name = "PACKAGE")]
    type_packages: Vec<String>,
    #[arg(long = "traversal-package", value_name = "PACKAGE")]
    traversal_packages: Vec<String>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    info!("Starting classdoc v{}", env!("CARGO_PKG_VERSION"));
    run(cli)
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let config = build_config(&cli)?;

    let started_at = Instant::now();
    let document = analyze(&cli.input, &config)?;

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &document)
        .context("failed to serialize OpenAPI document")?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .context("failed to write OpenAPI document")?;

    if cli.timing {
        info!(
            total_ms = started_at.elapsed().as_millis() as u64,
            paths = document.paths.len(),
            schemas = document.components.schemas.len(),
            "timing"
        );
    }

    Ok(())
}

/// Settings file first, then command line package overrides, then normalization.
fn build_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    if cli.config.is_some() && !path.exists() {
        anyhow::bail!("config not found: {}", path.display());
    }
    let mut config = Config::load_or_default(Some(path.as_path()))?;

    let scope = &mut config.scope;
    for (target, overrides) in [
        (&mut scope.controller_packages, &cli.controller_packages),
        (&mut scope.type_packages, &cli.type_packages),
        (&mut scope.traversal_packages, &cli.traversal_packages),
    ] {
        if !overrides.is_empty() {
            target.clone_from(overrides);
        }
    }
    config.normalize();

    if config.scope.controller_packages.is_empty() {
        anyhow::bail!(
            "no controller packages configured; pass --controller-package or set scope.controller_packages"
        );
    }
    Ok(config)
}

fn analyze(input: &Path, config: &Config) -> Result<Document> {
    let scan = scan_input(input)?;
    info!(
        classes = scan.units.len(),
        archives = scan.archive_count,
        "scanned input"
    );
    let records = scan.units.into_iter().map(ClassRecord::from_unit);
    let repository = ClassRepository::new(records, &config.scope)?;

    let endpoints = EndpointExtractor::new(&repository, config).extract()?;
    info!(endpoints = endpoints.len(), "extracted endpoints");

    let document = build_document(config, &repository, &endpoints)?;
    Ok(document)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        ))),
        None => Ok(Box::new(io::stdout())),
    }
}
