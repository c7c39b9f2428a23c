//! Database module for errand-pay
//!
//! This module handles persistent storage for:
//! - Jobs and their lifecycle status
//! - Payment records (the payment ledger / audit trail)

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod models;
mod queries;

pub use models::*;
pub use queries::*;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    /// SQLite connection (wrapped in Arc<Mutex> for thread safety)
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to database at {}", database_url);

        // Parse the database URL
        let path = if database_url.starts_with("sqlite:") {
            database_url.strip_prefix("sqlite:").unwrap_or(database_url)
        } else {
            database_url
        };

        // Ensure the directory exists for file-based databases
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Open the connection
        let conn = Connection::open(path)?;

        // Run migrations
        Self::run_migrations(&conn)?;

        info!("Database connected successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database, for tests and ephemeral runs
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
        debug!("Running database migrations...");

        // Jobs table. Status is a checked enum column; jobs are never
        // hard-deleted while a payment row references them (soft cancel only).
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                runner_id TEXT,
                description TEXT NOT NULL DEFAULT '',
                amount_sats INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'requested', 'accepted', 'in_progress', 'completed',
                    'payment_confirmed', 'cancelled', 'disputed'
                )),
                requested_at DATETIME NOT NULL,
                accepted_at DATETIME,
                started_at DATETIME,
                completed_at DATETIME,
                payment_confirmed_at DATETIME,
                cancelled_at DATETIME,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        // Payment ledger. The unique index on payment_hash is the storage-level
        // backstop against double-spend/replay; the unique index on job_id
        // enforces one payment per job. Rows are never deleted (audit trail).
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL UNIQUE REFERENCES jobs(id),
                payment_hash TEXT UNIQUE,
                preimage TEXT,
                amount_sats INTEGER NOT NULL,
                verification_level TEXT CHECK (verification_level IN (
                    'cryptographic', 'pending_manual', 'verified_manual', 'disputed'
                )),
                proof TEXT,
                paid_at DATETIME,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_client ON jobs(client_id)",
            [],
        )?;

        debug!("Database migrations completed");
        Ok(())
    }

    /// Get the database connection
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Close the database connection
    pub async fn close(&self) {
        info!("Closing database connection...");
        // The connection will be closed when the Arc is dropped
        info!("Database connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_connect() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let conn_lock = db.conn();
        let conn = conn_lock.lock().await;
        let count: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_status_check_constraint() {
        let db = Database::open_in_memory().await.unwrap();
        let conn_lock = db.conn();
        let conn = conn_lock.lock().await;
        let result = conn.execute(
            "INSERT INTO jobs (client_id, amount_sats, status, requested_at)
             VALUES ('client-1', 1000, 'paid', CURRENT_TIMESTAMP)",
            [],
        );
        assert!(result.is_err(), "unknown status must be rejected");
    }

    #[tokio::test]
    async fn test_payment_hash_unique_index() {
        let db = Database::open_in_memory().await.unwrap();
        let conn_lock = db.conn();
        let conn = conn_lock.lock().await;
        for job_id in [1, 2] {
            conn.execute(
                "INSERT INTO jobs (id, client_id, amount_sats, status, requested_at)
                 VALUES (?1, 'client-1', 1000, 'completed', CURRENT_TIMESTAMP)",
                [job_id],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO payments (job_id, payment_hash, amount_sats) VALUES (1, 'aa', 1000)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO payments (job_id, payment_hash, amount_sats) VALUES (2, 'aa', 1000)",
            [],
        );
        assert!(dup.is_err(), "reused payment hash must violate uniqueness");
    }
}
