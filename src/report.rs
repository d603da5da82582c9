//! Run report
//!
//! A [`PipelineReport`] is created at the start of a run, mutated as
//! collections and documents are processed, and finalized once into a
//! [`RunSummary`]. The summary renders as the text block logged at the end of
//! a run and serializes to JSON for machine consumers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::database::Gateway;
use crate::error::LoadResult;
use crate::provision::{MISSING_ATTRIBUTES_REPORT, MISSING_COLLECTIONS_REPORT};
use crate::value::{Row, SqlValue, prepare_value};

/// Run-scoped counters and sets
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Correlates log lines of one run
    pub run_id: Uuid,
    pub ingestion_date: NaiveDate,
    /// Mapped collections absent from the input
    pub missing_collections: BTreeSet<String>,
    /// Input collections without a mapping
    pub unmapped_collections: BTreeSet<String>,
    /// Schema-declared target tables absent from the database
    pub missing_tables_db: BTreeSet<String>,
    /// Schema-declared tables that no input collection feeds
    pub missing_tables_input: BTreeSet<String>,
    pub processed_counts: BTreeMap<String, usize>,
    pub error_counts: BTreeMap<String, usize>,
    pub insert_failures: BTreeMap<String, usize>,
    /// Object name -> last recorded status label
    pub object_statuses: BTreeMap<String, String>,
    pub missing_columns_by_object: BTreeMap<String, BTreeSet<String>>,
    /// Documents that had at least one missing column
    pub missing_columns_count: usize,
}

impl PipelineReport {
    pub fn new(ingestion_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ingestion_date,
            missing_collections: BTreeSet::new(),
            unmapped_collections: BTreeSet::new(),
            missing_tables_db: BTreeSet::new(),
            missing_tables_input: BTreeSet::new(),
            processed_counts: BTreeMap::new(),
            error_counts: BTreeMap::new(),
            insert_failures: BTreeMap::new(),
            object_statuses: BTreeMap::new(),
            missing_columns_by_object: BTreeMap::new(),
            missing_columns_count: 0,
        }
    }

    /// Record the outcome of one document attempt
    ///
    /// An insert failure is counted only as such; otherwise the document
    /// counts as processed, and additionally as an error when it had
    /// transformation errors.
    pub fn record_document(&mut self, collection: &str, had_errors: bool, insert_failed: bool) {
        if insert_failed {
            *self.insert_failures.entry(collection.to_string()).or_default() += 1;
            return;
        }
        *self.processed_counts.entry(collection.to_string()).or_default() += 1;
        if had_errors {
            *self.error_counts.entry(collection.to_string()).or_default() += 1;
        }
    }

    /// Record an object's status, replacing any earlier one
    pub fn record_object_status(&mut self, object_name: &str, status: impl Into<String>) {
        self.object_statuses
            .insert(object_name.to_string(), status.into());
    }

    /// Accumulate a document's missing columns for an object
    pub fn record_missing_columns(&mut self, object_name: &str, missing_columns: &[String]) {
        if missing_columns.is_empty() {
            return;
        }
        self.missing_columns_by_object
            .entry(object_name.to_string())
            .or_default()
            .extend(missing_columns.iter().cloned());
        self.missing_columns_count += 1;
    }

    /// Finalize the counters into a summary
    pub fn summary(&self) -> RunSummary {
        let total_processed: usize = self.processed_counts.values().sum();
        let total_failures: usize = self.insert_failures.values().sum();
        let total_errors: usize = self.error_counts.values().sum();

        let names: BTreeSet<&String> = self
            .processed_counts
            .keys()
            .chain(self.insert_failures.keys())
            .collect();
        let count = |map: &BTreeMap<String, usize>, name: &str| map.get(name).copied().unwrap_or(0);
        let collections = names
            .into_iter()
            .map(|name| CollectionSummary {
                name: name.clone(),
                processed: count(&self.processed_counts, name.as_str()),
                errors: count(&self.error_counts, name.as_str()),
                insert_failures: count(&self.insert_failures, name.as_str()),
            })
            .collect();

        RunSummary {
            run_id: self.run_id,
            ingestion_date: self.ingestion_date,
            total_documents: total_processed + total_failures,
            successful_documents: total_processed.saturating_sub(total_errors),
            documents_with_errors: total_errors,
            documents_with_missing_columns: self.missing_columns_count,
            insert_failures: total_failures,
            missing_collections: self.missing_collections.iter().cloned().collect(),
            unmapped_collections: self.unmapped_collections.iter().cloned().collect(),
            missing_tables_input: self.missing_tables_input.iter().cloned().collect(),
            missing_tables_db: self.missing_tables_db.iter().cloned().collect(),
            collections,
            object_statuses: self.object_statuses.clone(),
            missing_columns: self
                .missing_columns_by_object
                .iter()
                .map(|(object, columns)| (object.clone(), columns.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Log the rendered summary at INFO
    pub fn log_summary(&self) {
        tracing::info!(run_id = %self.run_id, "{}", self.summary());
    }

    /// Write the report rows into the two report tables of `schema`
    ///
    /// One `missing_collections_report` row per object status and one
    /// `missing_attributes_report` row per object with missing columns, all
    /// in a single unit of work. Returns the number of rows written.
    pub async fn persist<G>(&self, gateway: &mut G, schema: &str) -> LoadResult<usize>
    where
        G: Gateway + ?Sized,
    {
        let result = self.insert_report_rows(gateway, schema).await;
        match result {
            Ok(written) => {
                gateway.commit().await?;
                Ok(written)
            }
            Err(e) => {
                gateway.rollback().await?;
                Err(e)
            }
        }
    }

    async fn insert_report_rows<G>(&self, gateway: &mut G, schema: &str) -> LoadResult<usize>
    where
        G: Gateway + ?Sized,
    {
        let date = SqlValue::from(self.ingestion_date.to_string());
        let statuses_table = format!("{}.{}", schema, MISSING_COLLECTIONS_REPORT);
        let attributes_table = format!("{}.{}", schema, MISSING_ATTRIBUTES_REPORT);
        let mut written = 0;

        for (object_name, status) in &self.object_statuses {
            let mut row = Row::new();
            row.insert("ingestion_date".to_string(), date.clone());
            row.insert("object_name".to_string(), SqlValue::from(object_name.as_str()));
            row.insert("object_status".to_string(), SqlValue::from(status.as_str()));
            gateway.insert_row(&statuses_table, &row).await?;
            written += 1;
        }

        for (object_name, columns) in &self.missing_columns_by_object {
            let columns = columns
                .iter()
                .map(|column| serde_json::Value::String(column.clone()))
                .collect();
            let mut row = Row::new();
            row.insert("ingestion_date".to_string(), date.clone());
            row.insert("object_name".to_string(), SqlValue::from(object_name.as_str()));
            row.insert(
                "missing_columns".to_string(),
                prepare_value(&serde_json::Value::Array(columns)),
            );
            gateway.insert_row(&attributes_table, &row).await?;
            written += 1;
        }

        Ok(written)
    }
}

/// Per-collection counters in a summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub name: String,
    pub processed: usize,
    pub errors: usize,
    pub insert_failures: usize,
}

/// Final, serializable view of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub ingestion_date: NaiveDate,
    /// Processed documents plus insert failures
    pub total_documents: usize,
    /// Processed documents without transformation errors
    pub successful_documents: usize,
    pub documents_with_errors: usize,
    pub documents_with_missing_columns: usize,
    pub insert_failures: usize,
    pub missing_collections: Vec<String>,
    pub unmapped_collections: Vec<String>,
    pub missing_tables_input: Vec<String>,
    pub missing_tables_db: Vec<String>,
    pub collections: Vec<CollectionSummary>,
    pub object_statuses: BTreeMap<String, String>,
    pub missing_columns: BTreeMap<String, Vec<String>>,
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ETL Summary")?;
        writeln!(f, "Ingestion date: {}", self.ingestion_date)?;
        writeln!(f)?;
        writeln!(f, "KPI Summary:")?;
        writeln!(f, "  Total documents: {}", self.total_documents)?;
        writeln!(f, "  Successful documents: {}", self.successful_documents)?;
        writeln!(f, "  Documents with errors: {}", self.documents_with_errors)?;
        writeln!(
            f,
            "  Documents with missing columns: {}",
            self.documents_with_missing_columns
        )?;
        writeln!(f, "  Insert failures: {}", self.insert_failures)?;
        writeln!(f)?;
        writeln!(f, "Input coverage:")?;
        writeln!(f, "  Missing collections: {}", format_list(&self.missing_collections))?;
        writeln!(f, "  Unmapped collections: {}", format_list(&self.unmapped_collections))?;
        writeln!(
            f,
            "  Missing tables in schema.sql: {}",
            format_list(&self.missing_tables_input)
        )?;
        write!(
            f,
            "  Missing tables in database: {}",
            format_list(&self.missing_tables_db)
        )?;

        if !self.collections.is_empty() {
            let header = format!(
                "  {:<20} {:>9} {:>7} {:>11}",
                "Collection", "Processed", "Errors", "InsertFail"
            );
            write!(f, "\n\nPer-collection metrics:\n{}\n  {}", header, "-".repeat(header.len() - 2))?;
            for collection in &self.collections {
                write!(
                    f,
                    "\n  {:<20} {:>9} {:>7} {:>11}",
                    collection.name, collection.processed, collection.errors, collection.insert_failures
                )?;
            }
        }

        if !self.object_statuses.is_empty() {
            write!(f, "\n\nObject statuses:")?;
            for (object, status) in &self.object_statuses {
                write!(f, "\n  - {}: {}", object, status)?;
            }
        }

        if !self.missing_columns.is_empty() {
            write!(f, "\n\nMissing columns:")?;
            for (object, columns) in &self.missing_columns {
                write!(f, "\n  - {}: {}", object, columns.join(", "))?;
            }
        }

        Ok(())
    }
}
