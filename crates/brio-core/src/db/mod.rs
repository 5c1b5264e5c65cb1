//! SQLite database layer for the Brio engine.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, EngineError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(EngineError::from_sqlite)
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| EngineError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id               TEXT PRIMARY KEY,
                    campaign_id      TEXT NOT NULL,
                    organization_id  TEXT NOT NULL,
                    current_phase    TEXT NOT NULL,
                    status           TEXT NOT NULL DEFAULT 'pending',
                    attempt_count    INTEGER NOT NULL DEFAULT 0,
                    error_detail     TEXT,
                    lease_owner      TEXT,
                    lease_expires_at INTEGER,
                    created_at       INTEGER NOT NULL,
                    updated_at       INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_workflows_campaign ON workflows(campaign_id);
                CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
                -- at most one non-terminal workflow per campaign
                CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_active_campaign
                  ON workflows(campaign_id)
                  WHERE status NOT IN ('completed', 'failed', 'cancelled');

                CREATE TABLE IF NOT EXISTS phase_records (
                    id            TEXT PRIMARY KEY,
                    workflow_id   TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase         TEXT NOT NULL,
                    attempt       INTEGER NOT NULL,
                    outcome       TEXT,
                    agent_outputs TEXT NOT NULL DEFAULT '[]',
                    error_detail  TEXT,
                    started_at    INTEGER NOT NULL,
                    finished_at   INTEGER,
                    UNIQUE (workflow_id, phase, attempt)
                );
                CREATE INDEX IF NOT EXISTS idx_phase_records_workflow ON phase_records(workflow_id);

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id          TEXT PRIMARY KEY,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase       TEXT NOT NULL,
                    snapshot    TEXT NOT NULL,
                    version     INTEGER NOT NULL,
                    created_at  INTEGER NOT NULL,
                    UNIQUE (workflow_id, version)
                );
                CREATE INDEX IF NOT EXISTS idx_checkpoints_workflow ON checkpoints(workflow_id);

                CREATE TABLE IF NOT EXISTS deliverables (
                    id          TEXT PRIMARY KEY,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase       TEXT NOT NULL,
                    type        TEXT NOT NULL,
                    content     TEXT NOT NULL,
                    status      TEXT NOT NULL DEFAULT 'draft',
                    version     INTEGER NOT NULL DEFAULT 1,
                    created_at  INTEGER NOT NULL,
                    updated_at  INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_deliverables_workflow ON deliverables(workflow_id);

                CREATE TABLE IF NOT EXISTS approvals (
                    id                TEXT PRIMARY KEY,
                    workflow_id       TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase             TEXT NOT NULL,
                    presented_outputs TEXT NOT NULL DEFAULT '[]',
                    decision          TEXT NOT NULL DEFAULT 'pending',
                    feedback          TEXT,
                    created_at        INTEGER NOT NULL,
                    resolved_at       INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_approvals_workflow ON approvals(workflow_id);
                ",
            )
        })?;
        self.run_migrations()
    }

    /// Apply incremental migrations for schema changes on existing databases.
    fn run_migrations(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            // Lease columns landed after the first release (ignore error if already present)
            let _ = conn.execute("ALTER TABLE workflows ADD COLUMN lease_owner TEXT", []);
            let _ = conn.execute("ALTER TABLE workflows ADD COLUMN lease_expires_at INTEGER", []);
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_approvals_pending
                   ON approvals(workflow_id) WHERE decision = 'pending';",
            )
        })
    }
}
