//! Load command
//!
//! Reads and validates every file up front, installs logging at the
//! configured level, then drives the load on a tokio runtime.

use std::path::{Path, PathBuf};

use crate::cli::error::CliError;
use crate::cli::init_logging;
use crate::config::{AppConfig, MappingConfig};
use crate::input::InputBatch;
use crate::pipeline::run_loaded;
use crate::report::RunSummary;
use crate::schema::load_schema_tables;

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Input batch (JSON object of collection -> documents)
    pub input: PathBuf,
    /// Application config file
    pub app_config: PathBuf,
    /// Mapping config file
    pub mapping_config: PathBuf,
    /// Where to write the run summary as JSON
    pub summary_json: Option<PathBuf>,
}

/// Load a batch into the configured database
pub fn handle_run(args: &RunArgs) -> Result<RunSummary, CliError> {
    let config = AppConfig::load(&args.app_config)?;
    init_logging(&config.logging.level);

    let mapping = MappingConfig::load(&args.mapping_config, &config.runtime.type_mappings)?;
    let batch = InputBatch::load(&args.input)?;
    let schema_tables = load_schema_tables(&config.runtime.schema_path)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))?;
    let report = rt.block_on(run_loaded(&config, &mapping, &batch, &schema_tables))?;
    let summary = report.summary();

    if let Some(path) = &args.summary_json {
        write_summary(path, &summary)?;
    }
    Ok(summary)
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), CliError> {
    let write_failed = |e: String| CliError::FileWriteError(path.to_path_buf(), e);
    let json = serde_json::to_string_pretty(summary).map_err(|e| write_failed(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| write_failed(e.to_string()))
}
