//! Run orchestration
//!
//! A run moves through these states:
//!
//! ```text
//! INIT -> RECONCILE -> PROVISION_AUDIT
//!      -> per collection: RESOLVE_TABLE -> [CREATE] -> per document: TRANSFORM -> INSERT -> AUDIT
//!      -> SUMMARIZE -> DONE
//! ```
//!
//! Configuration and input problems surface before any database work. Once
//! connected, every document and every synthesized audit row is its own unit
//! of work: a failure is rolled back and recorded, and the batch carries on.
//! Only setup failures (audit provisioning, table resolution, DDL) abort the
//! run, and whatever was committed before stays committed.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{Instrument, error, info, warn};

use crate::audit::{AuditEntry, ObjectStatus, ProcessingStatus, build_audit_row, build_business_audit_fields};
use crate::config::{AppConfig, CollectionMapping, MappingConfig};
use crate::database::Gateway;
use crate::error::{LoadError, PipelineError};
use crate::input::{Document, InputBatch};
use crate::provision::{build_audit_table_columns, build_table_columns, report_table_columns};
use crate::report::PipelineReport;
use crate::schema::{Reconciliation, reconcile, split_table_name};
use crate::transform::TypeTransformer;
use crate::value::prepare_value;

/// What happened to one document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    /// Position in the collection
    pub index: usize,
    pub object_id: Option<String>,
    pub processing_status: ProcessingStatus,
    pub missing_columns: Vec<String>,
    pub errors: Vec<String>,
    /// The business row (or, failing that, the audit row) was not written
    pub insert_failed: bool,
}

impl DocumentOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// String form of a document's object id attribute
///
/// Strings are taken as is; other values use their JSON text. Absent and null
/// attributes have no id.
pub fn object_id_of(document: &Document, attribute: &str) -> Option<String> {
    match document.get(attribute) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Loads one batch through a [`Gateway`]
pub struct Pipeline<'a, G: Gateway> {
    config: &'a AppConfig,
    mapping: &'a MappingConfig,
    transformer: TypeTransformer,
    gateway: G,
}

impl<'a, G: Gateway> Pipeline<'a, G> {
    pub fn new(config: &'a AppConfig, mapping: &'a MappingConfig, gateway: G) -> Self {
        Self {
            config,
            mapping,
            transformer: TypeTransformer::from_runtime(&config.runtime),
            gateway,
        }
    }

    pub fn into_gateway(self) -> G {
        self.gateway
    }

    /// Run every state for a batch and return the report
    ///
    /// # Arguments
    /// * `batch` - input collections in file order
    /// * `schema_tables` - normalized tables declared in the schema source
    /// * `ingestion_date` - date stamped on the summary and report tables
    pub async fn load(
        &mut self,
        batch: &InputBatch,
        schema_tables: &BTreeSet<String>,
        ingestion_date: NaiveDate,
    ) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::new(ingestion_date);
        let span = tracing::info_span!("pipeline_run", run_id = %report.run_id);
        self.execute(batch, schema_tables, &mut report)
            .instrument(span)
            .await?;
        Ok(report)
    }

    async fn execute(
        &mut self,
        batch: &InputBatch,
        schema_tables: &BTreeSet<String>,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        info!(
            "Loading {} collection(s) through {}",
            batch.len(),
            self.gateway.backend_type()
        );

        let reconciliation = self.reconcile_inputs(batch, schema_tables, report);
        let report_schema = self.provision_audit().await?;
        self.audit_missing_tables(&reconciliation, report).await?;

        for (collection, documents) in batch.iter() {
            self.load_collection(collection, documents, &reconciliation, report)
                .await?;
        }

        report.log_summary();
        match report.persist(&mut self.gateway, &report_schema).await {
            Ok(rows) => info!("Wrote {} report row(s) to schema '{}'", rows, report_schema),
            Err(e) => error!("Failed to persist report tables: {}", e),
        }
        Ok(())
    }

    fn reconcile_inputs(
        &self,
        batch: &InputBatch,
        schema_tables: &BTreeSet<String>,
        report: &mut PipelineReport,
    ) -> Reconciliation {
        let audit = &self.config.audit;
        let reconciliation = reconcile(
            schema_tables,
            self.mapping,
            batch.collection_names(),
            &audit.audit_table,
            audit.audit_schema(),
        );

        if !reconciliation.missing_collections.is_empty() {
            report
                .missing_collections
                .extend(reconciliation.missing_collections.iter().cloned());
            warn!(
                "Missing collections in input: {}",
                join(&reconciliation.missing_collections)
            );
        }

        if !reconciliation.missing_tables_input.is_empty() {
            report.missing_tables_input.extend(
                reconciliation
                    .missing_tables_input
                    .iter()
                    .map(|table| reconciliation.display_name(table)),
            );
            warn!(
                "Tables in schema.sql missing from input: {}",
                join(&report.missing_tables_input)
            );
        }

        reconciliation
    }

    /// Create the audit schema, audit table and report tables
    ///
    /// Returns the schema holding the report tables.
    async fn provision_audit(&mut self) -> Result<String, PipelineError> {
        let config = self.config;
        let audit = &config.audit;
        let (table_schema, _) = split_table_name(&audit.audit_table);
        let target_schema = audit.audit_schema().unwrap_or(table_schema).to_string();

        self.gateway.create_schema(&target_schema).await?;
        if table_schema != target_schema {
            self.gateway.create_schema(table_schema).await?;
        }

        if !self.gateway.table_exists(&audit.audit_table).await? {
            self.gateway
                .create_table(&audit.audit_table, &build_audit_table_columns(audit))
                .await?;
            info!("Created audit table '{}'", audit.audit_table);
        }

        for (table, columns) in report_table_columns(&target_schema) {
            if !self.gateway.table_exists(&table).await? {
                self.gateway.create_table(&table, &columns).await?;
            }
        }
        self.gateway.commit().await?;

        if !self.gateway.table_exists(&audit.audit_table).await? {
            return Err(LoadError::MissingAuditTable(audit.audit_table.clone()).into());
        }
        Ok(target_schema)
    }

    /// One `MISSING` audit row per schema-declared table absent from input
    async fn audit_missing_tables(
        &mut self,
        reconciliation: &Reconciliation,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        let config = self.config;
        let audit = &config.audit;

        for table in &reconciliation.missing_tables_input {
            let object_name = reconciliation.display_name(table);
            report.record_object_status(&object_name, ObjectStatus::Missing.label(audit));

            let row = build_audit_row(
                audit,
                &AuditEntry {
                    object_id: None,
                    source_collection: reconciliation
                        .table_to_collection
                        .get(table)
                        .map(String::as_str),
                    object_name: &object_name,
                    object_status: ObjectStatus::Missing,
                    missing_columns: &[],
                    processing_status: ProcessingStatus::Missing,
                },
            );

            if let Err(e) = self.insert_and_commit(&audit.audit_table, &row).await {
                self.gateway.rollback().await?;
                error!(
                    "Failed to insert missing table audit for '{}': {}",
                    object_name, e
                );
            }
        }
        Ok(())
    }

    async fn load_collection(
        &mut self,
        collection: &str,
        documents: &[Document],
        reconciliation: &Reconciliation,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        let config = self.config;
        let mappings = self.mapping;
        let Some(mapping) = mappings.collection(collection) else {
            error!("No mapping found for collection '{}'.", collection);
            report.unmapped_collections.insert(collection.to_string());
            return Ok(());
        };
        let target_table = &mapping.target_table;

        let object_status = self
            .resolve_table(collection, mapping, reconciliation)
            .await?;
        report.record_object_status(target_table, object_status.label(&config.audit));

        if object_status == ObjectStatus::Missing {
            error!(
                "Missing destination table '{}' for collection '{}'.",
                target_table, collection
            );
            report.missing_tables_db.insert(target_table.clone());
        }

        if documents.is_empty() {
            info!("No documents found for collection '{}'.", collection);
            return Ok(());
        }

        for (index, document) in documents.iter().enumerate() {
            let outcome = self
                .load_document(collection, mapping, object_status, index, document)
                .await?;
            report.record_missing_columns(target_table, &outcome.missing_columns);
            report.record_document(collection, outcome.has_errors(), outcome.insert_failed);
        }
        Ok(())
    }

    /// Decide the target table's status, creating it when it is new
    ///
    /// An existing table wins; a table the schema source does not declare is
    /// created from the mapping; a declared but absent table is left alone.
    async fn resolve_table(
        &mut self,
        collection: &str,
        mapping: &CollectionMapping,
        reconciliation: &Reconciliation,
    ) -> Result<ObjectStatus, PipelineError> {
        let target_table = &mapping.target_table;

        if self.gateway.table_exists(target_table).await? {
            return Ok(ObjectStatus::AlreadyExists);
        }
        if reconciliation.is_declared(target_table) {
            return Ok(ObjectStatus::Missing);
        }

        let config = self.config;
        let audit = &config.audit;
        let columns = build_table_columns(
            mapping,
            &config.runtime.type_mappings,
            &audit.business_columns,
            &audit.business_column_types,
        )?;
        let (schema, _) = split_table_name(target_table);
        self.gateway.create_schema(schema).await?;
        self.gateway.create_table(target_table, &columns).await?;
        self.gateway.commit().await?;
        info!(
            "Created destination table '{}' for collection '{}'.",
            target_table, collection
        );
        Ok(ObjectStatus::New)
    }

    async fn load_document(
        &mut self,
        collection: &str,
        mapping: &CollectionMapping,
        object_status: ObjectStatus,
        index: usize,
        document: &Document,
    ) -> Result<DocumentOutcome, PipelineError> {
        let config = self.config;
        let audit = &config.audit;
        let result = self.transformer.transform_document(document, &mapping.mappings);

        if !result.missing_columns.is_empty() {
            let mut missing = result.missing_columns.clone();
            missing.sort();
            warn!(
                "Collection '{}' document {} missing columns: {}",
                collection,
                index,
                missing.join(", ")
            );
        }
        if result.has_errors() {
            error!(
                "Collection '{}' document {} transformation errors: {}",
                collection,
                index,
                result.errors.join("; ")
            );
        }

        let business_status = if result.has_errors() {
            ProcessingStatus::Error
        } else {
            ProcessingStatus::Success
        };

        let object_id = object_id_of(document, &mapping.object_id_attribute);
        if object_id.is_none() {
            warn!(
                "Collection '{}' document {} missing object_id attribute '{}'.",
                collection, index, mapping.object_id_attribute
            );
        }

        let (mut processing_status, mut insert_failed) = (business_status, false);
        if object_status == ObjectStatus::Missing {
            processing_status = ProcessingStatus::Missing;
            insert_failed = true;
        } else {
            let mut row = result.transformed.clone();
            row.insert(
                mapping.raw_json_column.clone(),
                prepare_value(&Value::Object(document.clone())),
            );
            row.extend(build_business_audit_fields(audit, collection, business_status));

            if let Err(e) = self.gateway.insert_row(&mapping.target_table, &row).await {
                self.gateway.rollback().await?;
                processing_status = ProcessingStatus::Error;
                insert_failed = true;
                error!(
                    "Failed to insert document {} in '{}': {}",
                    index, collection, e
                );
            }
        }

        let audit_row = build_audit_row(
            audit,
            &AuditEntry {
                object_id: object_id.clone(),
                source_collection: Some(collection),
                object_name: &mapping.target_table,
                object_status,
                missing_columns: &result.missing_columns,
                processing_status,
            },
        );
        if let Err(e) = self.insert_and_commit(&audit.audit_table, &audit_row).await {
            self.gateway.rollback().await?;
            insert_failed = true;
            error!(
                "Failed to insert audit record for document {} in '{}': {}",
                index, collection, e
            );
        }

        Ok(DocumentOutcome {
            index,
            object_id,
            processing_status,
            missing_columns: result.missing_columns,
            errors: result.errors,
            insert_failed,
        })
    }

    async fn insert_and_commit(
        &mut self,
        table: &str,
        row: &crate::value::Row,
    ) -> Result<(), LoadError> {
        self.gateway.insert_row(table, row).await?;
        self.gateway.commit().await
    }
}

fn join<'s>(items: impl IntoIterator<Item = &'s String>) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a batch into PostgreSQL with already-loaded configuration
///
/// Creates the database if allowed, opens the run's connection, loads the
/// batch and closes the connection on every path: committing on success,
/// rolling back on failure.
#[cfg(feature = "postgres-backend")]
pub async fn run_loaded(
    config: &AppConfig,
    mapping: &MappingConfig,
    batch: &InputBatch,
    schema_tables: &BTreeSet<String>,
) -> Result<PipelineReport, PipelineError> {
    use crate::database::{PostgresGateway, ensure_database};

    ensure_database(&config.database).await?;
    let gateway = PostgresGateway::connect(&config.database)
        .await?
        .with_output_formats(&config.runtime);

    let mut pipeline = Pipeline::new(config, mapping, gateway);
    let outcome = pipeline
        .load(batch, schema_tables, chrono::Utc::now().date_naive())
        .await;

    let closed = pipeline.into_gateway().close(outcome.is_ok()).await;
    match (outcome, closed) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), closed) => {
            if let Err(close_error) = closed {
                warn!("Failed to close connection after error: {}", close_error);
            }
            Err(e)
        }
    }
}

/// Run the loader from files
///
/// Configuration, mapping, input and schema source are all read and validated
/// before a connection is opened.
#[cfg(feature = "postgres-backend")]
pub async fn run(
    input_path: &std::path::Path,
    app_config_path: &std::path::Path,
    mapping_config_path: &std::path::Path,
) -> Result<PipelineReport, PipelineError> {
    let config = AppConfig::load(app_config_path)?;
    let mapping = MappingConfig::load(mapping_config_path, &config.runtime.type_mappings)?;
    let batch = InputBatch::load(input_path)?;
    let schema_tables = crate::schema::load_schema_tables(&config.runtime.schema_path)?;
    run_loaded(&config, &mapping, &batch, &schema_tables).await
}
