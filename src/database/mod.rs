//!
//! # Database Module for Parcelgate
//!
//! This module owns the SQLite connection pool holding customers, couriers,
//! parcels and deliveries.
//!
//! ## Features
//!
//! - **Database Initialization**: Creates the SQLite database file if needed.
//! - **Schema Bootstrap**: Creates every table with `CREATE TABLE IF NOT EXISTS` at startup.
//! - **Connection Management**: Hands out the shared `SqlitePool`.
//! - **Health Probe**: `ping` for the readiness endpoint.

pub mod models;
pub mod queries;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, migrate::MigrateDatabase};
use std::str::FromStr;
use tracing::info;

pub const PARCELGATE_DB_URL: &str = "sqlite://parcelgate.db";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        phone TEXT,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS couriers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        phone TEXT,
        vehicle TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS parcels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        description TEXT NOT NULL,
        weight_grams INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'registered',
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS deliveries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parcel_id INTEGER NOT NULL REFERENCES parcels(id),
        courier_id INTEGER NOT NULL REFERENCES couriers(id),
        status TEXT NOT NULL DEFAULT 'assigned',
        pickup_address TEXT NOT NULL,
        dropoff_address TEXT NOT NULL,
        assigned_at TEXT NOT NULL,
        delivered_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_parcels_customer ON parcels(customer_id);
    CREATE INDEX IF NOT EXISTS idx_deliveries_parcel ON deliveries(parcel_id);
    CREATE INDEX IF NOT EXISTS idx_deliveries_courier ON deliveries(courier_id);
"#;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Owner of the connection pool
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Create a new manager with a connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database, creating the file if it doesn't exist
    pub async fn connect_with_file_creation(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Opening parcel database at {}", database_url);

        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("Database does not exist at {}, creating it", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create any missing tables
    pub async fn initialize(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Parcel schema ready");
        Ok(())
    }

    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Round-trip check used by `/health`
pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Single-connection in-memory pool with the schema applied
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    DatabaseManager::new(pool.clone()).initialize().await.unwrap();
    pool
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = memory_pool().await;
        let manager = DatabaseManager::new(pool.clone());
        manager.initialize().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(name,)| name).collect();
        assert_eq!(names, vec!["couriers", "customers", "deliveries", "parcels"]);
        assert!(ping(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = std::env::temp_dir().join(format!("parcelgate-db-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let url = format!("sqlite://{}", dir.join("test.db").display());

        let manager = DatabaseManager::connect_with_file_creation(&url).await.unwrap();
        manager.initialize().await.unwrap();
        assert!(dir.join("test.db").exists());

        manager.into_pool().close().await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
