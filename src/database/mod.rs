//! Persistence gateway
//!
//! A [`Gateway`] is one exclusive unit-of-work connection to the destination
//! database. Statements run in an open transaction until [`Gateway::commit`]
//! or [`Gateway::rollback`] ends it, so a failed insert can be discarded
//! without losing work committed earlier in the run.
//!
//! - PostgreSQL: [`PostgresGateway`] (feature `postgres-backend`)

use async_trait::async_trait;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::{PostgresGateway, ensure_database};

pub use config::DatabaseSettings;

use crate::error::LoadResult;
use crate::provision::ColumnDef;
use crate::value::Row;

/// Transactional access to the destination database
///
/// Calls are issued sequentially by a single run; implementations need not
/// be shareable across tasks.
#[async_trait(?Send)]
pub trait Gateway {
    /// Check whether a table exists
    ///
    /// # Arguments
    /// * `table_name` - table name, optionally schema-qualified (`public` default)
    async fn table_exists(&mut self, table_name: &str) -> LoadResult<bool>;

    /// Create a schema if it does not exist
    ///
    /// Fails with [`crate::error::LoadError::EmptySchemaName`] on an empty name.
    async fn create_schema(&mut self, schema_name: &str) -> LoadResult<()>;

    /// Create a table if it does not exist
    ///
    /// Fails with [`crate::error::LoadError::NoColumns`] on an empty column list.
    async fn create_table(&mut self, table_name: &str, columns: &[ColumnDef]) -> LoadResult<()>;

    /// Insert one row, binding every value as a statement parameter
    ///
    /// Fails with [`crate::error::LoadError::EmptyRow`] on an empty row.
    async fn insert_row(&mut self, table_name: &str, row: &Row) -> LoadResult<()>;

    /// Make the current unit of work durable
    async fn commit(&mut self) -> LoadResult<()>;

    /// Discard the current unit of work
    async fn rollback(&mut self) -> LoadResult<()>;

    /// Backend type name for logs
    fn backend_type(&self) -> &'static str;
}
