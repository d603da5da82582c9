//! PostgreSQL gateway
//!
//! One `tokio-postgres` client per run, driven in explicit-transaction mode:
//! a `BEGIN` is sent lazily before the first statement of each unit of work
//! and `COMMIT`/`ROLLBACK` end it. Identifiers are quoted with
//! `pg_escape::quote_identifier`; values are always bound as parameters.
//!
//! `sslmode` `prefer` and `require` connect through `native-tls`; unset and
//! `disable` connect in plain text.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use native_tls::TlsConnector;
use pg_escape::quote_identifier;
use postgres_native_tls::MakeTlsConnector;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};

use super::Gateway;
use super::config::{DatabaseSettings, SslMode};
use crate::config::RuntimeSettings;
use crate::error::{LoadError, LoadResult};
use crate::provision::ColumnDef;
use crate::schema::split_table_name;
use crate::transform::{normalize_boolean, parse_with_format};
use crate::value::{Row, SqlValue};

fn format_pg_error(prefix: &str, error: &tokio_postgres::Error) -> String {
    if let Some(db_error) = error.as_db_error() {
        let detail = db_error.detail().unwrap_or("n/a");
        format!(
            "{prefix}: {} (sqlstate={} detail={})",
            db_error.message(),
            db_error.code().code(),
            detail
        )
    } else {
        format!("{prefix}: {error}")
    }
}

fn is_missing_database(error: &tokio_postgres::Error) -> bool {
    missing_database(
        error.as_db_error().map(|db_error| db_error.code()),
        &error.to_string(),
    )
}

/// Server code `3D000`, or the driver's message when there is no code
fn missing_database(code: Option<&SqlState>, message: &str) -> bool {
    match code {
        Some(code) => *code == SqlState::INVALID_CATALOG_NAME,
        None => message.contains("does not exist"),
    }
}

/// How the client socket is wrapped
#[derive(Clone)]
pub(crate) enum Transport {
    Plain,
    Tls(MakeTlsConnector),
}

impl Transport {
    /// Pick the transport for a configured `sslmode`
    pub(crate) fn for_mode(mode: Option<SslMode>) -> LoadResult<Self> {
        match mode {
            None | Some(SslMode::Disable) => Ok(Transport::Plain),
            Some(SslMode::Prefer | SslMode::Require) => {
                let connector = TlsConnector::builder().build().map_err(|e| {
                    LoadError::Connection(format!("Failed to initialize TLS: {}", e))
                })?;
                Ok(Transport::Tls(MakeTlsConnector::new(connector)))
            }
        }
    }

    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

fn client_config(settings: &DatabaseSettings) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&settings.host)
        .port(settings.port)
        .dbname(&settings.name)
        .user(&settings.user)
        .password(&settings.password)
        .ssl_mode(match settings.sslmode {
            None | Some(SslMode::Disable) => tokio_postgres::config::SslMode::Disable,
            Some(SslMode::Prefer) => tokio_postgres::config::SslMode::Prefer,
            Some(SslMode::Require) => tokio_postgres::config::SslMode::Require,
        });
    config
}

fn spawn_connection<F>(connection: F, target: String) -> JoinHandle<()>
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error on {}: {}", target, e);
        }
    })
}

async fn connect_client(
    settings: &DatabaseSettings,
    transport: &Transport,
) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error> {
    let config = client_config(settings);
    let target = settings.display_target();
    match transport {
        Transport::Plain => {
            let (client, connection) = config.connect(NoTls).await?;
            Ok((client, spawn_connection(connection, target)))
        }
        Transport::Tls(connector) => {
            let (client, connection) = config.connect(connector.clone()).await?;
            Ok((client, spawn_connection(connection, target)))
        }
    }
}

/// Create the target database when it does not exist
///
/// Does nothing when `create_if_missing` is off. Otherwise tries the target;
/// only a "database does not exist" failure leads to connecting to
/// `admin_db` and issuing `CREATE DATABASE`. Any other failure is returned
/// as is, without retry.
pub async fn ensure_database(settings: &DatabaseSettings) -> LoadResult<()> {
    if !settings.create_if_missing {
        return Ok(());
    }
    let transport = Transport::for_mode(settings.sslmode)?;

    match connect_client(settings, &transport).await {
        Ok(_) => return Ok(()),
        Err(e) if is_missing_database(&e) => {
            tracing::info!("Database '{}' does not exist; creating it", settings.name);
        }
        Err(e) => {
            return Err(LoadError::Connection(format_pg_error(
                &settings.display_target(),
                &e,
            )));
        }
    }

    let admin = settings.with_database(&settings.admin_db);
    let (client, _handle) = connect_client(&admin, &transport)
        .await
        .map_err(|e| LoadError::Connection(format_pg_error(&admin.display_target(), &e)))?;

    let create_failed = |e: tokio_postgres::Error| LoadError::CreateDatabase {
        name: settings.name.clone(),
        message: format_pg_error("CREATE DATABASE", &e),
    };

    let exists = client
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&settings.name])
        .await
        .map_err(create_failed)?
        .is_some();
    if !exists {
        client
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(&settings.name)))
            .await
            .map_err(create_failed)?;
        tracing::info!("Created database '{}'", settings.name);
    }
    Ok(())
}

/// Quoted `schema.table` for a configured table name
pub(crate) fn qualified_table(table_name: &str) -> String {
    let (schema, table) = split_table_name(table_name);
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

pub(crate) fn create_schema_sql(schema_name: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema_name))
}

pub(crate) fn create_table_sql(table_name: &str, columns: &[ColumnDef]) -> String {
    let columns_ddl: Vec<String> = columns
        .iter()
        .map(|column| {
            let not_null = if column.not_null { " NOT NULL" } else { "" };
            format!("{} {}{}", quote_identifier(&column.name), column.sql_type, not_null)
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_table(table_name),
        columns_ddl.join(", ")
    )
}

pub(crate) fn insert_sql<'a>(table_name: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
    let names: Vec<String> = columns
        .into_iter()
        .map(|name| quote_identifier(name).to_string())
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table(table_name),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// A value converted to the parameter type the server inferred
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BoundValue {
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Numeric(Option<Decimal>),
    Bool(Option<bool>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Json(Option<Value>),
}

impl BoundValue {
    pub(crate) fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int2(v) => v,
            Self::Int4(v) => v,
            Self::Int8(v) => v,
            Self::Float4(v) => v,
            Self::Float8(v) => v,
            Self::Numeric(v) => v,
            Self::Bool(v) => v,
            Self::Text(v) => v,
            Self::Date(v) => v,
            Self::Timestamp(v) => v,
            Self::TimestampTz(v) => v,
            Self::Json(v) => v,
        }
    }
}

/// Convert a value for a parameter of type `ty`
///
/// Text bound to a date or timestamp parameter is parsed with `text_formats`
/// first, then as ISO 8601.
pub(crate) fn bind_value(
    value: &SqlValue,
    ty: &Type,
    text_formats: &[String],
) -> Result<BoundValue, String> {
    let out_of_range = || format!("value out of range for {}", ty.name());
    let bound = match ty.name() {
        "int2" => BoundValue::Int2(
            to_i64(value)?
                .map(i16::try_from)
                .transpose()
                .map_err(|_| out_of_range())?,
        ),
        "int4" => BoundValue::Int4(
            to_i64(value)?
                .map(i32::try_from)
                .transpose()
                .map_err(|_| out_of_range())?,
        ),
        "int8" => BoundValue::Int8(to_i64(value)?),
        "float4" => BoundValue::Float4(to_f64(value)?.map(|f| f as f32)),
        "float8" => BoundValue::Float8(to_f64(value)?),
        "numeric" => BoundValue::Numeric(to_decimal(value)?),
        "bool" => BoundValue::Bool(to_bool(value)?),
        "text" | "varchar" | "bpchar" | "name" => BoundValue::Text(to_text(value)),
        "date" => BoundValue::Date(to_date(value, text_formats)?),
        "timestamp" => BoundValue::Timestamp(to_naive_datetime(value, text_formats)?),
        "timestamptz" => BoundValue::TimestampTz(to_datetime_utc(value, text_formats)?),
        "json" | "jsonb" => BoundValue::Json(to_json(value)),
        other => return Err(format!("unsupported column type '{}'", other)),
    };
    Ok(bound)
}

fn mismatch(value: &SqlValue, target: &str) -> String {
    format!("cannot convert {:?} to {}", value, target)
}

fn to_i64(value: &SqlValue) -> Result<Option<i64>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Int(i) => Some(*i),
        SqlValue::Bool(b) => Some(i64::from(*b)),
        SqlValue::Float(f) => whole_float(*f),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "integer"))
}

/// Whole floats inside the `i64` range
fn whole_float(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f as i64)
}

fn to_f64(value: &SqlValue) -> Result<Option<f64>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Float(f) => Some(*f),
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Decimal(d) => d.to_f64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "float"))
}

fn to_decimal(value: &SqlValue) -> Result<Option<Decimal>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Decimal(d) => Some(*d),
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::from_str(&f.to_string()).ok(),
        SqlValue::Text(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "numeric"))
}

fn to_bool(value: &SqlValue) -> Result<Option<bool>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        SqlValue::Text(s) => normalize_boolean(&Value::String(s.clone())),
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "boolean"))
}

fn to_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Bool(b) => Some(b.to_string()),
        SqlValue::Int(i) => Some(i.to_string()),
        SqlValue::Float(f) => Some(f.to_string()),
        SqlValue::Decimal(d) => Some(d.to_string()),
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Timestamp(ts) => Some(ts.to_rfc3339()),
        SqlValue::Json(v) => Some(v.to_string()),
    }
}

const DATETIME_TEXT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_datetime_text(s: &str, text_formats: &[String]) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Some(dt) = text_formats.iter().find_map(|format| parse_with_format(s, format)) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_TEXT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_date(value: &SqlValue, text_formats: &[String]) -> Result<Option<NaiveDate>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Timestamp(ts) => Some(ts.date_naive()),
        SqlValue::Text(s) => parse_datetime_text(s, text_formats).map(|dt| dt.date()),
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "date"))
}

fn to_naive_datetime(
    value: &SqlValue,
    text_formats: &[String],
) -> Result<Option<NaiveDateTime>, String> {
    let converted = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Timestamp(ts) => Some(ts.naive_utc()),
        SqlValue::Text(s) => parse_datetime_text(s, text_formats),
        _ => None,
    };
    converted.map(Some).ok_or_else(|| mismatch(value, "timestamp"))
}

fn to_datetime_utc(
    value: &SqlValue,
    text_formats: &[String],
) -> Result<Option<DateTime<Utc>>, String> {
    Ok(to_naive_datetime(value, text_formats)?.map(|dt| dt.and_utc()))
}

fn to_json(value: &SqlValue) -> Option<Value> {
    match value {
        SqlValue::Null => None,
        SqlValue::Bool(b) => Some(Value::Bool(*b)),
        SqlValue::Int(i) => Some(Value::from(*i)),
        SqlValue::Float(f) => Some(Value::from(*f)),
        SqlValue::Decimal(d) => Some(Value::String(d.to_string())),
        SqlValue::Text(s) => Some(Value::String(s.clone())),
        SqlValue::Timestamp(ts) => Some(Value::String(ts.to_rfc3339())),
        SqlValue::Json(v) => Some(v.clone()),
    }
}

/// Whether a unit of work is open on the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TransactionState {
    open: bool,
}

impl TransactionState {
    /// `BEGIN` when no unit of work is open yet
    pub(crate) fn begin_statement(&self) -> Option<&'static str> {
        (!self.open).then_some("BEGIN")
    }

    pub(crate) fn opened(&mut self) {
        self.open = true;
    }

    /// Mark the unit of work closed, returning whether one was open
    pub(crate) fn close(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}

/// Statement that ends the run's last unit of work
pub(crate) fn closing_statement(success: bool) -> &'static str {
    if success { "COMMIT" } else { "ROLLBACK" }
}

/// PostgreSQL implementation of [`Gateway`]
pub struct PostgresGateway {
    client: Client,
    connection: JoinHandle<()>,
    transaction: TransactionState,
    /// Formats tried first when text is bound to a date or timestamp column
    text_formats: Vec<String>,
}

impl PostgresGateway {
    /// Open the run's connection
    ///
    /// A target database that does not exist is reported as
    /// [`LoadError::DatabaseMissing`].
    pub async fn connect(settings: &DatabaseSettings) -> LoadResult<Self> {
        let transport = Transport::for_mode(settings.sslmode)?;
        let (client, connection) = connect_client(settings, &transport)
            .await
            .map_err(|e| {
                if is_missing_database(&e) {
                    LoadError::DatabaseMissing(settings.name.clone())
                } else {
                    LoadError::Connection(format_pg_error(&settings.display_target(), &e))
                }
            })?;
        tracing::debug!(
            "Connected to {} (tls: {})",
            settings.display_target(),
            transport.is_tls()
        );

        Ok(Self {
            client,
            connection,
            transaction: TransactionState::default(),
            text_formats: Vec::new(),
        })
    }

    /// Parse date and timestamp text with the transformer's output formats
    pub fn with_output_formats(mut self, runtime: &RuntimeSettings) -> Self {
        self.text_formats = vec![
            runtime.date_output_format.clone(),
            runtime.datetime_output_format.clone(),
        ];
        self
    }

    /// Commit on success, otherwise roll back, then drop the connection
    pub async fn close(mut self, success: bool) -> LoadResult<()> {
        let result = self.end(closing_statement(success)).await;

        let PostgresGateway {
            client, connection, ..
        } = self;
        drop(client);
        if let Err(e) = connection.await {
            tracing::warn!("PostgreSQL connection task ended abnormally: {}", e);
        }
        result
    }

    async fn begin(&mut self) -> LoadResult<()> {
        if let Some(statement) = self.transaction.begin_statement() {
            self.client
                .batch_execute(statement)
                .await
                .map_err(|e| LoadError::Transaction(format_pg_error(statement, &e)))?;
            self.transaction.opened();
        }
        Ok(())
    }

    async fn end(&mut self, statement: &str) -> LoadResult<()> {
        if !self.transaction.close() {
            return Ok(());
        }
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| LoadError::Transaction(format_pg_error(statement, &e)))
    }
}

#[async_trait(?Send)]
impl Gateway for PostgresGateway {
    async fn table_exists(&mut self, table_name: &str) -> LoadResult<bool> {
        self.begin().await?;
        let (schema, table) = split_table_name(table_name);
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&schema, &table],
            )
            .await
            .map_err(|e| LoadError::Statement(format_pg_error("Table lookup failed", &e)))?;
        row.try_get(0)
            .map_err(|e| LoadError::Statement(format_pg_error("Table lookup failed", &e)))
    }

    async fn create_schema(&mut self, schema_name: &str) -> LoadResult<()> {
        if schema_name.trim().is_empty() {
            return Err(LoadError::EmptySchemaName);
        }
        self.begin().await?;
        self.client
            .batch_execute(&create_schema_sql(schema_name))
            .await
            .map_err(|e| {
                LoadError::Statement(format_pg_error(
                    &format!("Failed to create schema '{}'", schema_name),
                    &e,
                ))
            })
    }

    async fn create_table(&mut self, table_name: &str, columns: &[ColumnDef]) -> LoadResult<()> {
        if columns.is_empty() {
            return Err(LoadError::NoColumns);
        }
        self.begin().await?;
        self.client
            .batch_execute(&create_table_sql(table_name, columns))
            .await
            .map_err(|e| {
                LoadError::Statement(format_pg_error(
                    &format!("Failed to create table '{}'", table_name),
                    &e,
                ))
            })
    }

    async fn insert_row(&mut self, table_name: &str, row: &Row) -> LoadResult<()> {
        if row.is_empty() {
            return Err(LoadError::EmptyRow);
        }
        self.begin().await?;

        let insert_failed = |e: tokio_postgres::Error| {
            LoadError::Statement(format_pg_error(
                &format!("INSERT failed for '{}'", table_name),
                &e,
            ))
        };

        let sql = insert_sql(table_name, row.keys().map(String::as_str));
        let statement = self.client.prepare(&sql).await.map_err(insert_failed)?;

        let params = row
            .iter()
            .zip(statement.params())
            .map(|((column, value), ty)| {
                bind_value(value, ty, &self.text_formats).map_err(|message| LoadError::Bind {
                    column: column.clone(),
                    message,
                })
            })
            .collect::<LoadResult<Vec<BoundValue>>>()?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(BoundValue::as_tosql).collect();

        self.client
            .execute(&statement, &param_refs)
            .await
            .map_err(insert_failed)?;
        Ok(())
    }

    async fn commit(&mut self) -> LoadResult<()> {
        self.end("COMMIT").await
    }

    async fn rollback(&mut self) -> LoadResult<()> {
        self.end("ROLLBACK").await
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
