//! Audit row construction
//!
//! Audit and business-audit columns are named by configuration, so every
//! audit write goes through these builders, which map the fixed logical
//! fields onto the configured physical column names. The ingestion instant is
//! taken (UTC) each time a row is built.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AuditSettings;
use crate::value::{Row, SqlValue, prepare_value};

/// Relationship between a mapped table and the database at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    /// Not declared in the schema source; created by this run
    New,
    /// Declared in the schema source but absent from the database or input
    Missing,
    /// Already present in the database
    AlreadyExists,
}

impl ObjectStatus {
    /// Configured label for this status
    pub fn label<'a>(&self, audit: &'a AuditSettings) -> &'a str {
        let values = &audit.object_status_values;
        match self {
            ObjectStatus::New => values.new.as_str(),
            ObjectStatus::Missing => values.missing.as_str(),
            ObjectStatus::AlreadyExists => values.already_exists.as_str(),
        }
    }
}

/// Outcome recorded on an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Success,
    Error,
    Missing,
}

impl ProcessingStatus {
    /// Configured label for this status
    pub fn label<'a>(&self, audit: &'a AuditSettings) -> &'a str {
        let values = &audit.status_values;
        match self {
            ProcessingStatus::Success => values.success.as_str(),
            ProcessingStatus::Error => values.error.as_str(),
            ProcessingStatus::Missing => values.missing.as_str(),
        }
    }
}

/// Logical content of one audit row
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry<'a> {
    pub object_id: Option<String>,
    pub source_collection: Option<&'a str>,
    pub object_name: &'a str,
    pub object_status: ObjectStatus,
    pub missing_columns: &'a [String],
    pub processing_status: ProcessingStatus,
}

/// Build an audit row keyed by the configured audit column names
pub fn build_audit_row(audit: &AuditSettings, entry: &AuditEntry<'_>) -> Row {
    let columns = &audit.audit_columns;
    let missing: Vec<Value> = entry
        .missing_columns
        .iter()
        .map(|column| Value::String(column.clone()))
        .collect();

    let mut row = Row::new();
    row.insert(columns.ingested_at.clone(), SqlValue::from(Utc::now()));
    row.insert(columns.object_id.clone(), SqlValue::from(entry.object_id.clone()));
    row.insert(
        columns.source_collection.clone(),
        SqlValue::from(entry.source_collection.map(str::to_string)),
    );
    row.insert(columns.object_name.clone(), SqlValue::from(entry.object_name));
    row.insert(
        columns.object_status.clone(),
        SqlValue::from(entry.object_status.label(audit)),
    );
    row.insert(columns.missing_columns.clone(), prepare_value(&Value::Array(missing)));
    row.insert(
        columns.processing_status.clone(),
        SqlValue::from(entry.processing_status.label(audit)),
    );
    row
}

/// Build the audit fields appended to every business row
pub fn build_business_audit_fields(
    audit: &AuditSettings,
    collection: &str,
    status: ProcessingStatus,
) -> Row {
    let columns = &audit.business_columns;
    let mut row = Row::new();
    row.insert(columns.ingested_at.clone(), SqlValue::from(Utc::now()));
    row.insert(columns.source_collection.clone(), SqlValue::from(collection));
    row.insert(columns.status.clone(), SqlValue::from(status.label(audit)));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, sample_app_config};

    fn audit_settings() -> AuditSettings {
        let mut config: AppConfig = serde_yaml::from_str(sample_app_config()).unwrap();
        config.audit.audit_columns.object_id = "doc_id".to_string();
        config.audit.status_values.success = "OK".to_string();
        config.audit
    }

    #[test]
    fn test_build_audit_row_uses_configured_names() {
        let audit = audit_settings();
        let missing = vec!["name".to_string()];
        let row = build_audit_row(
            &audit,
            &AuditEntry {
                object_id: Some("42".to_string()),
                source_collection: Some("users"),
                object_name: "public.users",
                object_status: ObjectStatus::New,
                missing_columns: &missing,
                processing_status: ProcessingStatus::Success,
            },
        );

        assert_eq!(row.len(), 7);
        assert_eq!(row["doc_id"], SqlValue::from("42"));
        assert!(!row.contains_key("object_id"));
        assert_eq!(row["object_status"], SqlValue::from("NEW"));
        assert_eq!(row["processing_status"], SqlValue::from("OK"));
        assert_eq!(row["missing_columns"], SqlValue::Json(serde_json::json!(["name"])));
        assert!(matches!(row["ingested_at"], SqlValue::Timestamp(_)));
    }

    #[test]
    fn test_build_audit_row_nullable_fields() {
        let audit = audit_settings();
        let row = build_audit_row(
            &audit,
            &AuditEntry {
                object_id: None,
                source_collection: None,
                object_name: "public.orders",
                object_status: ObjectStatus::Missing,
                missing_columns: &[],
                processing_status: ProcessingStatus::Missing,
            },
        );
        assert!(row["doc_id"].is_null());
        assert!(row["source_collection"].is_null());
        assert_eq!(row["missing_columns"], SqlValue::Json(serde_json::json!([])));
    }

    #[test]
    fn test_business_audit_fields() {
        let audit = audit_settings();
        let row = build_business_audit_fields(&audit, "users", ProcessingStatus::Error);
        assert_eq!(row.len(), 3);
        assert_eq!(row["source_collection"], SqlValue::from("users"));
        assert_eq!(row["status"], SqlValue::from("ERROR"));
    }

    #[test]
    fn test_ingestion_instant_taken_per_row() {
        let audit = audit_settings();
        let first = build_business_audit_fields(&audit, "users", ProcessingStatus::Success);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = build_business_audit_fields(&audit, "users", ProcessingStatus::Success);
        assert_ne!(first["ingested_at"], second["ingested_at"]);
    }
}
