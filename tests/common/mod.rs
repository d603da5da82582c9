//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use docload::config::sample_app_config;
use docload::error::{LoadError, LoadResult};
use docload::schema::{parse_schema_tables, split_table_name};
use docload::{AppConfig, ColumnDef, Gateway, InputBatch, MappingConfig, Row, SqlValue};

pub const AUDIT_TABLE: &str = "doc_audit.ingestion_audit";
pub const STATUS_REPORT: &str = "doc_audit.missing_collections_report";
pub const ATTRIBUTES_REPORT: &str = "doc_audit.missing_attributes_report";

/// One in-memory table
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    pub schemas: BTreeSet<String>,
    pub tables: BTreeMap<String, MemoryTable>,
}

/// Gateway keeping committed state apart from the open unit of work
#[derive(Debug, Default)]
pub struct MemoryGateway {
    pub committed: MemoryDb,
    pending: Option<MemoryDb>,
    /// Tables whose inserts always fail
    pub failing_inserts: HashSet<String>,
    /// Tables whose creation silently does nothing
    pub ignored_creates: HashSet<String>,
    pub create_table_calls: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

fn table_key(table_name: &str) -> String {
    let (schema, table) = split_table_name(table_name);
    format!("{}.{}", schema, table)
}

impl MemoryGateway {
    pub fn new() -> Self {
        let mut gateway = Self::default();
        gateway.committed.schemas.insert("public".to_string());
        gateway
    }

    /// Start with an already committed table
    pub fn with_table(mut self, table_name: &str, columns: Vec<ColumnDef>) -> Self {
        let (schema, _) = split_table_name(table_name);
        self.committed.schemas.insert(schema.to_string());
        self.committed.tables.insert(
            table_key(table_name),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        self
    }

    pub fn failing_insert(mut self, table_name: &str) -> Self {
        self.failing_inserts.insert(table_key(table_name));
        self
    }

    pub fn ignoring_create(mut self, table_name: &str) -> Self {
        self.ignored_creates.insert(table_key(table_name));
        self
    }

    /// Committed rows of a table
    pub fn rows(&self, table_name: &str) -> Vec<Row> {
        self.committed
            .tables
            .get(&table_key(table_name))
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.committed.tables.contains_key(&table_key(table_name))
    }

    pub fn columns(&self, table_name: &str) -> Vec<ColumnDef> {
        self.committed
            .tables
            .get(&table_key(table_name))
            .map(|table| table.columns.clone())
            .unwrap_or_default()
    }

    fn work(&mut self) -> &mut MemoryDb {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.clone())
    }

    fn view(&self) -> &MemoryDb {
        self.pending.as_ref().unwrap_or(&self.committed)
    }
}

#[async_trait(?Send)]
impl Gateway for MemoryGateway {
    async fn table_exists(&mut self, table_name: &str) -> LoadResult<bool> {
        Ok(self.view().tables.contains_key(&table_key(table_name)))
    }

    async fn create_schema(&mut self, schema_name: &str) -> LoadResult<()> {
        if schema_name.trim().is_empty() {
            return Err(LoadError::EmptySchemaName);
        }
        self.work().schemas.insert(schema_name.to_string());
        Ok(())
    }

    async fn create_table(&mut self, table_name: &str, columns: &[ColumnDef]) -> LoadResult<()> {
        if columns.is_empty() {
            return Err(LoadError::NoColumns);
        }
        self.create_table_calls += 1;
        let key = table_key(table_name);
        if self.ignored_creates.contains(&key) {
            return Ok(());
        }

        let (schema, _) = split_table_name(table_name);
        let work = self.work();
        if !work.schemas.contains(schema) {
            return Err(LoadError::Statement(format!(
                "schema \"{}\" does not exist",
                schema
            )));
        }
        work.tables.entry(key).or_insert_with(|| MemoryTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn insert_row(&mut self, table_name: &str, row: &Row) -> LoadResult<()> {
        if row.is_empty() {
            return Err(LoadError::EmptyRow);
        }
        let key = table_key(table_name);
        if self.failing_inserts.contains(&key) {
            return Err(LoadError::Statement(format!("INSERT failed for '{}'", table_name)));
        }

        let work = self.work();
        let table = work.tables.get_mut(&key).ok_or_else(|| {
            LoadError::Statement(format!("relation \"{}\" does not exist", table_name))
        })?;
        for name in row.keys() {
            if !table.columns.iter().any(|column| &column.name == name) {
                return Err(LoadError::Statement(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    name, table_name
                )));
            }
        }
        for column in table.columns.iter().filter(|column| column.not_null) {
            if row.get(&column.name).is_none_or(SqlValue::is_null) {
                return Err(LoadError::Statement(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    column.name
                )));
            }
        }
        table.rows.push(row.clone());
        Ok(())
    }

    async fn commit(&mut self) -> LoadResult<()> {
        if let Some(work) = self.pending.take() {
            self.committed = work;
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> LoadResult<()> {
        self.pending = None;
        self.rollbacks += 1;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

pub fn app_config() -> AppConfig {
    serde_yaml::from_str(sample_app_config()).unwrap()
}

/// `users -> public.users` with `id:int, name:text, joined:date`
pub fn users_mapping() -> MappingConfig {
    serde_yaml::from_str(
        r#"
collections:
  users:
    target_table: public.users
    raw_json_column: raw_document
    object_id_attribute: id
    mappings:
      id: {column: id, type: int}
      name: {column: name, type: text}
      joined: {column: joined, type: date}
"#,
    )
    .unwrap()
}

pub fn batch(value: serde_json::Value) -> InputBatch {
    InputBatch::from_value(value).unwrap()
}

pub fn schema_tables(sql: &str) -> BTreeSet<String> {
    parse_schema_tables(sql)
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}
