//! Application and mapping configuration
//!
//! Two files drive a run:
//! - the application config (`database`, `runtime`, `audit`, `logging`)
//! - the mapping config (`collections`, one entry per input collection)
//!
//! Both may be JSON, YAML or TOML. They are parsed into typed structures and
//! validated once, before any database connection is opened.

pub mod types;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::database::config::DatabaseSettings;
use crate::error::{ConfigError, ConfigResult};
use types::{is_supported_type, normalize_type, normalize_type_mappings};

/// Runtime section: transformation formats, schema source and type table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Input formats tried in order for date and datetime columns
    pub date_formats: Vec<String>,
    pub date_output_format: String,
    pub datetime_output_format: String,
    /// Path to the static schema source (`CREATE TABLE IF NOT EXISTS ...`)
    pub schema_path: PathBuf,
    /// Declared mapping type -> destination SQL type
    pub type_mappings: BTreeMap<String, String>,
}

/// Physical names (or SQL types) of the columns added to every business row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessColumns {
    pub ingested_at: String,
    pub source_collection: String,
    pub status: String,
}

impl BusinessColumns {
    /// Entries in declaration order as `(logical name, value)`
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("ingested_at", self.ingested_at.as_str()),
            ("source_collection", self.source_collection.as_str()),
            ("status", self.status.as_str()),
        ]
    }
}

/// Physical names (or SQL types) of the audit table columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditColumns {
    pub ingested_at: String,
    pub object_id: String,
    pub source_collection: String,
    pub object_name: String,
    pub object_status: String,
    pub missing_columns: String,
    pub processing_status: String,
}

impl AuditColumns {
    /// Entries in declaration order as `(logical name, value)`
    pub fn entries(&self) -> [(&'static str, &str); 7] {
        [
            ("ingested_at", self.ingested_at.as_str()),
            ("object_id", self.object_id.as_str()),
            ("source_collection", self.source_collection.as_str()),
            ("object_name", self.object_name.as_str()),
            ("object_status", self.object_status.as_str()),
            ("missing_columns", self.missing_columns.as_str()),
            ("processing_status", self.processing_status.as_str()),
        ]
    }
}

/// Labels written for each processing outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusValues {
    pub success: String,
    pub error: String,
    pub missing: String,
}

/// Labels written for each destination table state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectStatusValues {
    pub new: String,
    pub missing: String,
    pub already_exists: String,
}

/// Audit section: audit table location, column naming and status labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    pub business_columns: BusinessColumns,
    pub business_column_types: BusinessColumns,
    /// Schema holding the audit and report tables
    #[serde(default)]
    pub audit_schema: Option<String>,
    pub audit_table: String,
    pub audit_columns: AuditColumns,
    pub audit_column_types: AuditColumns,
    pub status_values: StatusValues,
    pub object_status_values: ObjectStatusValues,
}

impl AuditSettings {
    /// Configured audit schema, treating an empty value as unset
    pub fn audit_schema(&self) -> Option<&str> {
        self.audit_schema
            .as_deref()
            .map(str::trim)
            .filter(|schema| !schema.is_empty())
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level name such as `info` or `debug`
    pub level: String,
}

/// Application configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub runtime: RuntimeSettings,
    pub audit: AuditSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load, apply environment overrides and validate an application config
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config: AppConfig = load_config(path)?;
        config.database.apply_env_overrides();
        validate_app_config(&config)?;
        Ok(config)
    }
}

/// One source attribute's destination column and declared type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            type_name: type_name.into(),
        }
    }
}

/// Mapping definition for one input collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMapping {
    /// Destination table, optionally schema-qualified
    pub target_table: String,
    /// Column receiving the untouched source document
    pub raw_json_column: String,
    /// Source attribute copied into the audit `object_id`
    pub object_id_attribute: String,
    /// Source attribute -> destination column
    pub mappings: BTreeMap<String, ColumnMapping>,
}

/// Mapping configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    pub collections: BTreeMap<String, CollectionMapping>,
}

impl MappingConfig {
    /// Load and validate a mapping config against the runtime type table
    pub fn load(path: &Path, type_mappings: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let config: MappingConfig = load_config(path)?;
        validate_mapping_config(&config)?;
        validate_mapping_types(&config, type_mappings)?;
        Ok(config)
    }

    /// Mapping for a collection, if one is declared
    pub fn collection(&self, name: &str) -> Option<&CollectionMapping> {
        self.collections.get(name)
    }
}

/// Read a JSON, YAML or TOML file into a typed configuration structure
pub fn load_config<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e.to_string()))?;

    let parse_failed = |e: String| ConfigError::ParseFailed(path.to_path_buf(), e);
    let value: serde_json::Value = match extension.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| parse_failed(e.to_string()))?,
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).map_err(|e| parse_failed(e.to_string()))?
        }
        "toml" => toml::from_str(&content).map_err(|e| parse_failed(e.to_string()))?,
        other => return Err(ConfigError::UnsupportedFormat(format!(".{}", other))),
    };

    if !value.is_object() {
        return Err(ConfigError::NotAnObject(path.to_path_buf()));
    }

    serde_json::from_value(value).map_err(|e| parse_failed(e.to_string()))
}

fn require_non_empty(value: &str, setting: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingSetting(setting.to_string()));
    }
    Ok(())
}

/// Validate settings that the type system alone cannot enforce
pub fn validate_app_config(config: &AppConfig) -> ConfigResult<()> {
    let database = &config.database;
    require_non_empty(&database.host, "database.host")?;
    require_non_empty(&database.name, "database.name")?;
    require_non_empty(&database.user, "database.user")?;

    let runtime = &config.runtime;
    if runtime.date_formats.is_empty() {
        return Err(ConfigError::MissingSetting("runtime.date_formats".to_string()));
    }
    require_non_empty(&runtime.date_output_format, "runtime.date_output_format")?;
    require_non_empty(
        &runtime.datetime_output_format,
        "runtime.datetime_output_format",
    )?;
    if runtime.schema_path.as_os_str().is_empty() {
        return Err(ConfigError::MissingSetting("runtime.schema_path".to_string()));
    }
    if runtime.type_mappings.is_empty() {
        return Err(ConfigError::MissingSetting("runtime.type_mappings".to_string()));
    }

    let audit = &config.audit;
    require_non_empty(&audit.audit_table, "audit.audit_table")?;
    for (logical, name) in audit.business_columns.entries() {
        require_non_empty(name, &format!("audit.business_columns.{}", logical))?;
    }
    for (logical, sql_type) in audit.business_column_types.entries() {
        require_non_empty(sql_type, &format!("audit.business_column_types.{}", logical))?;
    }
    for (logical, name) in audit.audit_columns.entries() {
        require_non_empty(name, &format!("audit.audit_columns.{}", logical))?;
    }
    for (logical, sql_type) in audit.audit_column_types.entries() {
        require_non_empty(sql_type, &format!("audit.audit_column_types.{}", logical))?;
    }

    let statuses = &audit.status_values;
    require_non_empty(&statuses.success, "audit.status_values.success")?;
    require_non_empty(&statuses.error, "audit.status_values.error")?;
    require_non_empty(&statuses.missing, "audit.status_values.missing")?;

    let object_statuses = &audit.object_status_values;
    require_non_empty(&object_statuses.new, "audit.object_status_values.new")?;
    require_non_empty(&object_statuses.missing, "audit.object_status_values.missing")?;
    require_non_empty(
        &object_statuses.already_exists,
        "audit.object_status_values.already_exists",
    )?;

    require_non_empty(&config.logging.level, "logging.level")?;
    Ok(())
}

/// Validate the shape of every collection mapping
pub fn validate_mapping_config(config: &MappingConfig) -> ConfigResult<()> {
    if config.collections.is_empty() {
        return Err(ConfigError::MissingSetting(
            "collections (mapping config 'collections' must be a non-empty object)".to_string(),
        ));
    }

    for (collection, mapping) in &config.collections {
        let invalid = |message: String| ConfigError::InvalidMapping {
            collection: collection.clone(),
            message,
        };

        if mapping.target_table.trim().is_empty() {
            return Err(invalid("'target_table' is empty".to_string()));
        }
        if mapping.raw_json_column.trim().is_empty() {
            return Err(invalid("'raw_json_column' is empty".to_string()));
        }
        if mapping.object_id_attribute.trim().is_empty() {
            return Err(invalid("'object_id_attribute' is empty".to_string()));
        }
        if mapping.mappings.is_empty() {
            return Err(invalid("mappings must be a non-empty object".to_string()));
        }

        let mut seen = HashSet::new();
        for (attribute, entry) in &mapping.mappings {
            if entry.column.trim().is_empty() || entry.type_name.trim().is_empty() {
                return Err(invalid(format!(
                    "entry for attribute '{}' must include 'column' and 'type'",
                    attribute
                )));
            }
            if !seen.insert(entry.column.as_str()) {
                return Err(invalid(format!(
                    "column '{}' is mapped more than once",
                    entry.column
                )));
            }
        }
    }

    Ok(())
}

/// Check every declared type is supported and has a destination SQL type
pub fn validate_mapping_types(
    config: &MappingConfig,
    type_mappings: &BTreeMap<String, String>,
) -> ConfigResult<()> {
    let normalized = normalize_type_mappings(type_mappings);
    for (collection, mapping) in &config.collections {
        for (attribute, entry) in &mapping.mappings {
            if !is_supported_type(&entry.type_name) {
                return Err(ConfigError::UnsupportedType {
                    type_name: entry.type_name.clone(),
                    attribute: attribute.clone(),
                    collection: collection.clone(),
                });
            }
            if !normalized.contains_key(&normalize_type(&entry.type_name)) {
                return Err(ConfigError::MissingTypeMapping(entry.type_name.clone()));
            }
        }
    }
    Ok(())
}

/// Generate a sample application config
pub fn sample_app_config() -> &'static str {
    r#"# docload application configuration

database:
  host: localhost
  port: 5432
  name: etl
  user: etl
  password: etl
  # sslmode: prefer
  # Create the database through admin_db when it does not exist
  create_if_missing: true
  admin_db: postgres

runtime:
  # Tried in order; the first matching format wins
  date_formats:
    - "%Y-%m-%d"
    - "%d-%m-%Y"
    - "%Y-%m-%dT%H:%M:%S"
    - "%Y-%m-%d %H:%M:%S"
  date_output_format: "%Y-%m-%d"
  datetime_output_format: "%Y-%m-%d %H:%M:%S"
  schema_path: config/schema.sql
  type_mappings:
    text: TEXT
    string: TEXT
    varchar: VARCHAR
    integer: INTEGER
    int: INTEGER
    bigint: BIGINT
    smallint: SMALLINT
    float: DOUBLE PRECISION
    double: DOUBLE PRECISION
    double precision: DOUBLE PRECISION
    numeric: NUMERIC
    decimal: NUMERIC
    boolean: BOOLEAN
    bool: BOOLEAN
    date: DATE
    datetime: TIMESTAMP

audit:
  business_columns:
    ingested_at: ingested_at
    source_collection: source_collection
    status: status
  business_column_types:
    ingested_at: TIMESTAMPTZ
    source_collection: TEXT
    status: TEXT
  audit_schema: doc_audit
  audit_table: doc_audit.ingestion_audit
  audit_columns:
    ingested_at: ingested_at
    object_id: object_id
    source_collection: source_collection
    object_name: object_name
    object_status: object_status
    missing_columns: missing_columns
    processing_status: processing_status
  audit_column_types:
    ingested_at: TIMESTAMPTZ
    object_id: TEXT
    source_collection: TEXT
    object_name: TEXT
    object_status: TEXT
    missing_columns: JSONB
    processing_status: TEXT
  status_values:
    success: SUCCESS
    error: ERROR
    missing: MISSING
  object_status_values:
    new: NEW
    missing: MISSING
    already_exists: ALREADY_EXISTS

logging:
  level: info
"#
}

/// Generate a sample mapping config
pub fn sample_mapping_config() -> &'static str {
    r#"# docload mapping configuration

collections:
  users:
    target_table: public.users
    raw_json_column: raw_document
    object_id_attribute: id
    mappings:
      id:
        column: id
        type: int
      name:
        column: name
        type: text
      joined:
        column: joined
        type: date
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_app() -> AppConfig {
        serde_yaml::from_str(sample_app_config()).unwrap()
    }

    fn sample_mapping() -> MappingConfig {
        serde_yaml::from_str(sample_mapping_config()).unwrap()
    }

    #[test]
    fn test_sample_configs_are_valid() {
        let app = sample_app();
        validate_app_config(&app).unwrap();
        let mapping = sample_mapping();
        validate_mapping_config(&mapping).unwrap();
        validate_mapping_types(&mapping, &app.runtime.type_mappings).unwrap();
        assert_eq!(app.audit.audit_schema(), Some("doc_audit"));
    }

    #[test]
    fn test_load_config_by_extension() {
        let dir = tempdir().unwrap();

        let yaml_path = dir.path().join("mapping.yaml");
        std::fs::write(&yaml_path, sample_mapping_config()).unwrap();
        let from_yaml: MappingConfig = load_config(&yaml_path).unwrap();

        let json_path = dir.path().join("mapping.json");
        std::fs::write(&json_path, serde_json::to_string(&from_yaml).unwrap()).unwrap();
        let from_json: MappingConfig = load_config(&json_path).unwrap();

        let toml_path = dir.path().join("mapping.toml");
        std::fs::write(&toml_path, toml::to_string(&from_yaml).unwrap()).unwrap();
        let from_toml: MappingConfig = load_config(&toml_path).unwrap();

        assert_eq!(from_json.collections["users"].target_table, "public.users");
        assert_eq!(from_toml.collections["users"].mappings.len(), 3);
    }

    #[test]
    fn test_load_config_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.ini");
        std::fs::write(&path, "collections = 1").unwrap();
        let result: ConfigResult<MappingConfig> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == ".ini"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result: ConfigResult<MappingConfig> = load_config(Path::new("/nonexistent/app.yaml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_requires_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let result: ConfigResult<MappingConfig> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotAnObject(_))));
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, r#"{"logging": {"level": "info"}}"#).unwrap();
        let result: ConfigResult<AppConfig> = load_config(&path);
        match result {
            Err(ConfigError::ParseFailed(_, message)) => assert!(message.contains("database")),
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_date_formats_rejected() {
        let mut app = sample_app();
        app.runtime.date_formats.clear();
        let err = validate_app_config(&app).unwrap_err();
        assert_eq!(err.to_string(), "Missing runtime.date_formats in app config.");
    }

    #[test]
    fn test_empty_status_label_rejected() {
        let mut app = sample_app();
        app.audit.object_status_values.already_exists = " ".to_string();
        assert!(validate_app_config(&app).is_err());
    }

    #[test]
    fn test_unsupported_mapping_type() {
        let app = sample_app();
        let mut mapping = sample_mapping();
        mapping
            .collections
            .get_mut("users")
            .unwrap()
            .mappings
            .insert("tags".to_string(), ColumnMapping::new("tags", "array"));
        let err = validate_mapping_types(&mapping, &app.runtime.type_mappings).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedType { ref type_name, .. } if type_name == "array"));
    }

    #[test]
    fn test_mapping_type_missing_from_type_table() {
        let mut app = sample_app();
        app.runtime.type_mappings.remove("date");
        let err = validate_mapping_types(&sample_mapping(), &app.runtime.type_mappings).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTypeMapping(ref t) if t == "date"));
    }

    #[test]
    fn test_duplicate_column_in_mapping_rejected() {
        let mut mapping = sample_mapping();
        mapping
            .collections
            .get_mut("users")
            .unwrap()
            .mappings
            .insert("full_name".to_string(), ColumnMapping::new("name", "text"));
        assert!(matches!(
            validate_mapping_config(&mapping),
            Err(ConfigError::InvalidMapping { .. })
        ));
    }

    #[test]
    fn test_empty_collections_rejected() {
        assert!(validate_mapping_config(&MappingConfig::default()).is_err());
    }

    #[test]
    fn test_blank_audit_schema_is_unset() {
        let mut app = sample_app();
        app.audit.audit_schema = Some("  ".to_string());
        assert_eq!(app.audit.audit_schema(), None);
    }
}
