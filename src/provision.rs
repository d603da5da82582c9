//! Destination table column derivation
//!
//! Column lists for auto-provisioned business tables, the audit table and the
//! two report tables. Derivation is pure; DDL is issued by a
//! [`crate::database::Gateway`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::config::{AuditSettings, BusinessColumns, CollectionMapping};
use crate::config::types::{normalize_type, normalize_type_mappings};
use crate::error::{ConfigError, ConfigResult};

/// Report table recording each object's status per ingestion date
pub const MISSING_COLLECTIONS_REPORT: &str = "missing_collections_report";

/// Report table recording each object's missing columns per ingestion date
pub const MISSING_ATTRIBUTES_REPORT: &str = "missing_attributes_report";

/// SQL type of the raw document column
pub const RAW_JSON_TYPE: &str = "JSONB";

/// A column in a `CREATE TABLE` statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub not_null: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

#[derive(Default)]
struct ColumnList {
    columns: Vec<ColumnDef>,
    names: HashSet<String>,
}

impl ColumnList {
    fn push(&mut self, column: ColumnDef) -> ConfigResult<()> {
        if !self.names.insert(column.name.clone()) {
            return Err(ConfigError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        Ok(())
    }
}

/// Derive the columns of a business table for a collection
///
/// Mapped columns come first (nullable, typed through `type_mappings`), then
/// the raw document column, then the business audit columns (all NOT NULL).
///
/// # Errors
///
/// Fails on an unmapped type, a business column without a configured type, or
/// any duplicated column name.
pub fn build_table_columns(
    mapping: &CollectionMapping,
    type_mappings: &BTreeMap<String, String>,
    business_columns: &BusinessColumns,
    business_column_types: &BusinessColumns,
) -> ConfigResult<Vec<ColumnDef>> {
    let type_mappings = normalize_type_mappings(type_mappings);
    let mut list = ColumnList::default();

    for entry in mapping.mappings.values() {
        let sql_type = type_mappings
            .get(&normalize_type(&entry.type_name))
            .ok_or_else(|| ConfigError::MissingTypeMapping(entry.type_name.clone()))?;
        list.push(ColumnDef::new(&entry.column, sql_type))?;
    }

    list.push(ColumnDef::new(&mapping.raw_json_column, RAW_JSON_TYPE).not_null())?;

    let types: BTreeMap<&str, &str> = business_column_types
        .entries()
        .into_iter()
        .filter(|(_, sql_type)| !sql_type.trim().is_empty())
        .collect();
    for (logical, name) in business_columns.entries() {
        let sql_type = types
            .get(logical)
            .ok_or_else(|| ConfigError::MissingBusinessColumnType(logical.to_string()))?;
        list.push(ColumnDef::new(name, *sql_type).not_null())?;
    }

    Ok(list.columns)
}

/// Derive the audit table columns in their fixed logical order
///
/// A logical column without a configured type is left out.
pub fn build_audit_table_columns(audit: &AuditSettings) -> Vec<ColumnDef> {
    let types = audit.audit_column_types.entries();
    audit
        .audit_columns
        .entries()
        .into_iter()
        .zip(types)
        .filter(|(_, (_, sql_type))| !sql_type.trim().is_empty())
        .map(|((_, name), (_, sql_type))| ColumnDef::new(name, sql_type))
        .collect()
}

/// Report tables and their columns, qualified with `schema`
pub fn report_table_columns(schema: &str) -> Vec<(String, Vec<ColumnDef>)> {
    vec![
        (
            format!("{}.{}", schema, MISSING_ATTRIBUTES_REPORT),
            vec![
                ColumnDef::new("ingestion_date", "DATE"),
                ColumnDef::new("object_name", "TEXT"),
                ColumnDef::new("missing_columns", "JSONB"),
            ],
        ),
        (
            format!("{}.{}", schema, MISSING_COLLECTIONS_REPORT),
            vec![
                ColumnDef::new("ingestion_date", "DATE"),
                ColumnDef::new("object_name", "TEXT"),
                ColumnDef::new("object_status", "TEXT"),
            ],
        ),
    ]
}
