//! Schema source scanning and table-name reconciliation
//!
//! The static schema source is a SQL file. Only the identifiers following
//! `CREATE TABLE IF NOT EXISTS` are harvested; everything else is ignored.
//! Table names are compared in normalized form: lower-cased schema and table,
//! with `public` as the schema of an unqualified name.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::MappingConfig;
use crate::error::{ConfigError, ConfigResult};

/// Schema assumed for unqualified table names
pub const DEFAULT_SCHEMA: &str = "public";

static RE_CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)CREATE\s+TABLE\s+IF\s+NOT\s+EXISTS\s+([^\s(]+)").expect("Invalid regex")
});

/// Split a table name into `(schema, table)` on the first `.`
pub fn split_table_name(table_name: &str) -> (&str, &str) {
    match table_name.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (DEFAULT_SCHEMA, table_name),
    }
}

/// Normalize a table name to lower-case `schema.table`
pub fn normalize_table_name(table_name: &str) -> String {
    let (schema, table) = split_table_name(table_name);
    format!("{}.{}", schema.to_lowercase(), table.to_lowercase())
}

/// Extract normalized table names declared in SQL text
pub fn parse_schema_tables(sql: &str) -> BTreeSet<String> {
    RE_CREATE_TABLE
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| normalize_table_name(m.as_str()))
        .collect()
}

/// Read the schema source and extract its declared tables
pub fn load_schema_tables(path: &Path) -> ConfigResult<BTreeSet<String>> {
    if !path.exists() {
        return Err(ConfigError::SchemaNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e.to_string()))?;
    Ok(parse_schema_tables(&content))
}

/// Comparison of schema-declared, mapping-declared and input-present tables
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Schema-declared tables, minus the audit schema and audit table
    pub schema_tables: BTreeSet<String>,
    /// Mapped collections that are absent from the input
    pub missing_collections: BTreeSet<String>,
    /// Normalized schema tables that no input collection feeds
    pub missing_tables_input: BTreeSet<String>,
    /// Normalized table -> table name as configured in the mapping
    pub table_lookup: BTreeMap<String, String>,
    /// Normalized table -> collection that targets it
    pub table_to_collection: BTreeMap<String, String>,
}

impl Reconciliation {
    /// Table name for reporting: the mapping's spelling when known
    pub fn display_name(&self, normalized: &str) -> String {
        self.table_lookup
            .get(normalized)
            .cloned()
            .unwrap_or_else(|| normalized.to_string())
    }

    /// Check whether a table is declared in the schema source
    pub fn is_declared(&self, table_name: &str) -> bool {
        self.schema_tables.contains(&normalize_table_name(table_name))
    }
}

/// Compare schema, mapping and input table sets
///
/// # Arguments
///
/// * `schema_tables` - normalized tables from the schema source
/// * `mapping` - collection mappings
/// * `input_collections` - collection names present in the input batch
/// * `audit_table` - audit table name, excluded from the comparison
/// * `audit_schema` - schema whose tables are all excluded, if configured
pub fn reconcile<'a>(
    schema_tables: &BTreeSet<String>,
    mapping: &MappingConfig,
    input_collections: impl IntoIterator<Item = &'a str>,
    audit_table: &str,
    audit_schema: Option<&str>,
) -> Reconciliation {
    let normalized_audit_table = normalize_table_name(audit_table);
    let audit_schema = audit_schema.map(str::to_lowercase);

    let declared: BTreeSet<String> = schema_tables
        .iter()
        .filter(|table| {
            let (schema, _) = split_table_name(table);
            if audit_schema.as_deref() == Some(schema.to_lowercase().as_str()) {
                return false;
            }
            **table != normalized_audit_table
        })
        .cloned()
        .collect();

    let mut table_lookup = BTreeMap::new();
    let mut table_to_collection = BTreeMap::new();
    for (collection, config) in &mapping.collections {
        let normalized = normalize_table_name(&config.target_table);
        table_lookup.insert(normalized.clone(), config.target_table.clone());
        table_to_collection.insert(normalized, collection.clone());
    }

    let input: BTreeSet<&str> = input_collections.into_iter().collect();

    let missing_collections = mapping
        .collections
        .keys()
        .filter(|name| !input.contains(name.as_str()))
        .cloned()
        .collect();

    let input_tables: BTreeSet<String> = input
        .iter()
        .filter_map(|name| mapping.collection(name))
        .map(|config| normalize_table_name(&config.target_table))
        .collect();

    let missing_tables_input = declared.difference(&input_tables).cloned().collect();

    Reconciliation {
        schema_tables: declared,
        missing_collections,
        missing_tables_input,
        table_lookup,
        table_to_collection,
    }
}
