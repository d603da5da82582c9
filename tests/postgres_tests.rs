//! Gateway tests against a live PostgreSQL server
//!
//! Run with `cargo test -- --ignored` and `DOCLOAD_DB_HOST`, `_PORT`, `_NAME`,
//! `_USER`, `_PASSWORD` pointing at a server where the user may create
//! databases. Each test works in its own scratch database.

#![cfg(feature = "postgres-backend")]

use serde_json::json;
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

use docload::error::LoadError;
use docload::{ColumnDef, DatabaseSettings, Gateway, PostgresGateway, Row, SqlValue, ensure_database};

/// Settings for a fresh database, created through the env-configured one
fn scratch_settings() -> DatabaseSettings {
    let mut base = DatabaseSettings::new("localhost", 5432, "postgres", "postgres", "postgres");
    base.apply_env_overrides();

    let mut target = base.with_database(&format!("docload_it_{}", Uuid::new_v4().simple()));
    target.admin_db = base.name.clone();
    target
}

async fn raw_client(settings: &DatabaseSettings, database: &str) -> Client {
    let (client, connection) = tokio_postgres::Config::new()
        .host(&settings.host)
        .port(settings.port)
        .dbname(database)
        .user(&settings.user)
        .password(&settings.password)
        .connect(NoTls)
        .await
        .unwrap();
    tokio::spawn(connection);
    client
}

async fn drop_database(settings: &DatabaseSettings) {
    let admin = raw_client(settings, &settings.admin_db).await;
    admin
        .batch_execute(&format!("DROP DATABASE IF EXISTS {}", settings.name))
        .await
        .unwrap();
}

async fn count_rows(settings: &DatabaseSettings, table: &str) -> i64 {
    let client = raw_client(settings, &settings.name).await;
    client
        .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
        .await
        .unwrap()
        .get(0)
}

fn order_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", "INTEGER"),
        ColumnDef::new("ordered_on", "DATE"),
        ColumnDef::new("raw_document", "JSONB").not_null(),
    ]
}

fn order_row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), SqlValue::Int(id));
    row.insert("ordered_on".to_string(), SqlValue::from("2024-01-05"));
    row.insert("raw_document".to_string(), SqlValue::Json(json!({"id": id})));
    row
}

#[tokio::test]
#[ignore = "needs PostgreSQL configured through DOCLOAD_DB_*"]
async fn test_ensure_database_creates_once() {
    let settings = scratch_settings();

    ensure_database(&settings).await.unwrap();
    ensure_database(&settings).await.unwrap();

    let gateway = PostgresGateway::connect(&settings).await.unwrap();
    assert_eq!(gateway.backend_type(), "postgres");
    gateway.close(true).await.unwrap();

    drop_database(&settings).await;
}

#[tokio::test]
#[ignore = "needs PostgreSQL configured through DOCLOAD_DB_*"]
async fn test_missing_database_without_auto_create() {
    let mut settings = scratch_settings();
    settings.create_if_missing = false;

    ensure_database(&settings).await.unwrap();
    assert!(matches!(
        PostgresGateway::connect(&settings).await,
        Err(LoadError::DatabaseMissing(name)) if name == settings.name
    ));
}

#[tokio::test]
#[ignore = "needs PostgreSQL configured through DOCLOAD_DB_*"]
async fn test_units_of_work_and_idempotent_ddl() {
    let settings = scratch_settings();
    ensure_database(&settings).await.unwrap();
    let mut gateway = PostgresGateway::connect(&settings).await.unwrap();

    gateway.create_schema("sales").await.unwrap();
    gateway.create_table("sales.orders", &order_columns()).await.unwrap();
    gateway.commit().await.unwrap();
    gateway.create_table("sales.orders", &order_columns()).await.unwrap();
    gateway.commit().await.unwrap();
    assert!(gateway.table_exists("sales.orders").await.unwrap());
    assert!(!gateway.table_exists("sales.returns").await.unwrap());

    gateway.insert_row("sales.orders", &order_row(1)).await.unwrap();
    gateway.rollback().await.unwrap();
    gateway.insert_row("sales.orders", &order_row(2)).await.unwrap();
    gateway.commit().await.unwrap();

    let mut bad = order_row(3);
    bad.insert("raw_document".to_string(), SqlValue::Null);
    assert!(gateway.insert_row("sales.orders", &bad).await.is_err());
    gateway.rollback().await.unwrap();

    gateway.insert_row("sales.orders", &order_row(4)).await.unwrap();
    gateway.close(true).await.unwrap();

    assert_eq!(count_rows(&settings, "sales.orders").await, 2);
    drop_database(&settings).await;
}

#[tokio::test]
#[ignore = "needs PostgreSQL configured through DOCLOAD_DB_*"]
async fn test_close_after_failure_rolls_back() {
    let settings = scratch_settings();
    ensure_database(&settings).await.unwrap();
    let mut gateway = PostgresGateway::connect(&settings).await.unwrap();

    gateway.create_table("orders", &order_columns()).await.unwrap();
    gateway.commit().await.unwrap();
    gateway.insert_row("orders", &order_row(1)).await.unwrap();
    gateway.close(false).await.unwrap();

    assert_eq!(count_rows(&settings, "public.orders").await, 0);
    drop_database(&settings).await;
}
