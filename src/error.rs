//! Error types for the loader
//!
//! Errors fall into three kinds that mirror the phases of a run:
//! - [`ConfigError`]: settings, mappings and the schema source are unusable
//! - [`InputError`]: the document batch has the wrong shape
//! - [`LoadError`]: anything that happens against the database
//!
//! Configuration and input errors are always raised before a connection is
//! opened. Per-attribute transformation failures are not errors at all; they
//! travel as data inside a [`crate::transform::TransformResult`].

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported config format: {0}. Use JSON, YAML or TOML.")]
    UnsupportedFormat(String),

    #[error("Failed to read {0}: {1}")]
    ReadFailed(PathBuf, String),

    #[error("Failed to parse {0}: {1}")]
    ParseFailed(PathBuf, String),

    #[error("Config file must contain an object: {0}")]
    NotAnObject(PathBuf),

    #[error("Missing {0} in app config.")]
    MissingSetting(String),

    #[error("Invalid mapping for collection '{collection}': {message}")]
    InvalidMapping { collection: String, message: String },

    #[error("Unsupported mapping type '{type_name}' for attribute '{attribute}' in collection '{collection}'.")]
    UnsupportedType {
        type_name: String,
        attribute: String,
        collection: String,
    },

    #[error("Missing SQL type mapping for '{0}' in runtime.type_mappings.")]
    MissingTypeMapping(String),

    #[error("Missing audit.business_column_types for '{0}'.")]
    MissingBusinessColumnType(String),

    #[error("Duplicate column name detected: {0}")]
    DuplicateColumn(String),

    #[error("Schema file not found: {0}")]
    SchemaNotFound(PathBuf),
}

/// Structurally invalid document batch
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read input {0}: {1}")]
    ReadFailed(PathBuf, String),

    #[error("Input is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Input JSON must be an object keyed by collection name.")]
    NotAnObject,

    #[error("Collection '{0}' must map to a list of documents.")]
    NotAList(String),

    #[error("Document at index {index} in collection '{collection}' must be an object.")]
    DocumentNotAnObject { collection: String, index: usize },
}

/// Database-related failure
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connection(String),

    #[error("Database '{0}' does not exist and auto-create is disabled.")]
    DatabaseMissing(String),

    #[error("Failed to create database '{name}': {message}")]
    CreateDatabase { name: String, message: String },

    #[error("Audit table '{0}' is missing in the database.")]
    MissingAuditTable(String),

    #[error("Schema name is required.")]
    EmptySchemaName,

    #[error("Cannot create table without columns.")]
    NoColumns,

    #[error("Cannot insert empty row.")]
    EmptyRow,

    #[error("Cannot bind value for column '{column}': {message}")]
    Bind { column: String, message: String },

    #[error("Statement failed: {0}")]
    Statement(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Any error that aborts a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for database operations
pub type LoadResult<T> = Result<T, LoadError>;
