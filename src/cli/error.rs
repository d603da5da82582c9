//! CLI-specific error types

use crate::error::{ConfigError, InputError, PipelineError};
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Pipeline(err.into())
    }
}

impl From<InputError> for CliError {
    fn from(err: InputError) -> Self {
        CliError::Pipeline(err.into())
    }
}
