//! Declared column types
//!
//! Mapping entries name their destination type with free-form strings such as
//! `"Integer"` or `" double precision "`. Names are compared after trimming and
//! lower-casing, and several spellings collapse onto one [`ColumnType`].

use std::collections::BTreeMap;

/// Type names accepted in mapping files (already normalized)
pub const SUPPORTED_TYPES: &[&str] = &[
    "text",
    "string",
    "varchar",
    "integer",
    "int",
    "bigint",
    "smallint",
    "float",
    "double",
    "double precision",
    "numeric",
    "decimal",
    "boolean",
    "bool",
    "date",
    "datetime",
];

/// Normalize a declared type name for comparison
pub fn normalize_type(type_name: &str) -> String {
    type_name.trim().to_lowercase()
}

/// Normalize the keys of a `runtime.type_mappings` table
pub fn normalize_type_mappings(type_mappings: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    type_mappings
        .iter()
        .map(|(key, value)| (normalize_type(key), value.clone()))
        .collect()
}

/// Check whether a declared type name is supported
pub fn is_supported_type(type_name: &str) -> bool {
    SUPPORTED_TYPES.contains(&normalize_type(type_name).as_str())
}

/// Coercion family a declared type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Numeric,
    Boolean,
    Date,
    DateTime,
}

impl ColumnType {
    /// Resolve a declared type name, returning `None` for unsupported names
    pub fn from_name(type_name: &str) -> Option<Self> {
        match normalize_type(type_name).as_str() {
            "text" | "string" | "varchar" => Some(ColumnType::Text),
            "integer" | "int" | "bigint" | "smallint" => Some(ColumnType::Integer),
            "float" | "double" | "double precision" => Some(ColumnType::Float),
            "numeric" | "decimal" => Some(ColumnType::Numeric),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            "date" => Some(ColumnType::Date),
            "datetime" => Some(ColumnType::DateTime),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("  Double Precision "), "double precision");
        assert_eq!(normalize_type("INT"), "int");
    }

    #[test]
    fn test_every_supported_type_resolves() {
        for name in SUPPORTED_TYPES {
            assert!(ColumnType::from_name(name).is_some(), "{name} should resolve");
        }
    }

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(ColumnType::from_name(" BIGINT"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::from_name("Bool"), Some(ColumnType::Boolean));
        assert_eq!(ColumnType::from_name("uuid"), None);
    }

    #[test]
    fn test_normalize_type_mappings() {
        let mut mappings = BTreeMap::new();
        mappings.insert(" Integer ".to_string(), "INTEGER".to_string());
        let normalized = normalize_type_mappings(&mappings);
        assert_eq!(normalized.get("integer"), Some(&"INTEGER".to_string()));
    }
}
