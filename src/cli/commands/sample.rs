//! Sample configuration command

use std::path::Path;

use crate::cli::error::CliError;
use crate::config::{sample_app_config, sample_mapping_config};

/// Which sample to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    App,
    Mapping,
}

impl SampleKind {
    pub fn content(self) -> &'static str {
        match self {
            SampleKind::App => sample_app_config(),
            SampleKind::Mapping => sample_mapping_config(),
        }
    }
}

/// Print a sample config, or write it to `output`
pub fn handle_sample_config(kind: SampleKind, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => std::fs::write(path, kind.content())
            .map_err(|e| CliError::FileWriteError(path.to_path_buf(), e.to_string())),
        None => {
            print!("{}", kind.content());
            Ok(())
        }
    }
}
