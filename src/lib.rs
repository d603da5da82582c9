//! docload - document collection loader for PostgreSQL
//!
//! Loads batches of JSON documents, grouped by collection, into relational
//! tables according to a declarative mapping:
//! - Typed column conversion with per-attribute error isolation
//! - On-demand schema and table provisioning
//! - A per-document audit trail and per-run report tables
//! - A run summary reconciling expected and actual collections and tables

pub mod audit;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod provision;
pub mod report;
pub mod schema;
pub mod transform;
pub mod value;

pub use audit::{AuditEntry, ObjectStatus, ProcessingStatus};
pub use config::{AppConfig, CollectionMapping, ColumnMapping, MappingConfig};
pub use database::{DatabaseSettings, Gateway};
#[cfg(feature = "postgres-backend")]
pub use database::{PostgresGateway, ensure_database};
pub use error::{ConfigError, InputError, LoadError, PipelineError};
pub use input::{Document, InputBatch};
pub use pipeline::{DocumentOutcome, Pipeline};
#[cfg(feature = "postgres-backend")]
pub use pipeline::{run, run_loaded};
pub use provision::ColumnDef;
pub use report::{PipelineReport, RunSummary};
pub use transform::{TransformResult, TypeTransformer};
pub use value::{Row, SqlValue};
