//! Database engine - a single-threaded query worker.
//!
//! Grounded on the teacher's `persistence/database.rs` (pool construction,
//! masked-URL logging, migration runner) generalised from Postgres to a
//! single-connection SQLite engine per SPEC_FULL §4.4: one worker task,
//! one connection, lazily opened, vacuumed and UUID/version-stamped on
//! every open, closed after an idle interval.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::request::{self, RequestError};

const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trunkline.db"),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

type Job = Box<dyn FnOnce(Option<SqlitePool>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// One worker task owning one SQLite connection pool, serialising all SQL
/// access behind its own mpsc queue.
pub struct DatabaseEngine {
    config: DatabaseConfig,
    pool: Option<SqlitePool>,
    last_used: Instant,
    cmd_rx: mpsc::Receiver<Job>,
}

impl DatabaseEngine {
    /// Spawns the engine as a background task and returns a cloneable
    /// handle for callers.
    pub fn spawn(config: DatabaseConfig) -> DatabaseHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let engine = Self {
            config,
            pool: None,
            last_used: Instant::now(),
            cmd_rx,
        };
        tokio::spawn(engine.run());
        DatabaseHandle { cmd_tx }
    }

    async fn run(mut self) {
        let mut idle_check = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                maybe_job = self.cmd_rx.recv() => {
                    let Some(job) = maybe_job else { break };
                    let pool = self.ensure_open().await;
                    job(pool).await;
                }
                _ = idle_check.tick() => {
                    self.maybe_close_idle().await;
                }
            }
        }
    }

    async fn ensure_open(&mut self) -> Option<SqlitePool> {
        self.last_used = Instant::now();
        if let Some(pool) = &self.pool {
            return Some(pool.clone());
        }

        match open_and_prepare(&self.config.path).await {
            Ok(pool) => {
                self.pool = Some(pool.clone());
                Some(pool)
            }
            Err(e) => {
                error!(error = %e, path = %self.config.path.display(), "database open failed");
                None
            }
        }
    }

    async fn maybe_close_idle(&mut self) {
        if self.pool.is_some() && self.last_used.elapsed() >= self.config.idle_timeout {
            info!("closing idle database connection");
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }
        }
    }
}

async fn open_and_prepare(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let is_new = !path.exists();
    info!(path = %path.display(), new = is_new, "opening database");

    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

    if is_new {
        seed_defaults(&pool).await?;
    } else {
        vacuum_and_stamp(&pool).await?;
    }

    Ok(pool)
}

async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let uuid = process_uuid();
    sqlx::query("INSERT OR IGNORE INTO Config(id, realm, dialing, uuid, version) VALUES (1, 'local', '', ?, ?)")
        .bind(uuid.to_string())
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO Switches(uuid, version) VALUES (?, ?)")
        .bind(uuid.to_string())
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    for (authname, fullname, atype) in [("system", "System", "OTHER"), ("operator", "Operator", "USER"), ("anonymous", "Anonymous", "OTHER")] {
        sqlx::query(
            "INSERT OR IGNORE INTO Authorize(authname, realm, digest, secret, fullname, type, access) \
             VALUES (?, 'local', 'MD5', '', ?, ?, 0)",
        )
        .bind(authname)
        .bind(fullname)
        .bind(atype)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn vacuum_and_stamp(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("VACUUM").execute(pool).await?;
    let row = sqlx::query("SELECT uuid FROM Switches LIMIT 1").fetch_optional(pool).await?;
    let uuid = row
        .and_then(|r| r.try_get::<String, _>("uuid").ok())
        .unwrap_or_else(|| process_uuid().to_string());
    sqlx::query("UPDATE Switches SET uuid = ?, version = ?").bind(&uuid).bind(SCHEMA_VERSION).execute(pool).await?;
    Ok(())
}

/// A process-wide UUID, generated on first run and persisted next to the
/// working directory (§6).
pub fn process_uuid() -> Uuid {
    let marker = PathBuf::from(".trunkline-uuid");
    if let Ok(existing) = std::fs::read_to_string(&marker) {
        if let Ok(uuid) = Uuid::parse_str(existing.trim()) {
            return uuid;
        }
    }
    let uuid = Uuid::new_v4();
    if let Err(e) = std::fs::write(&marker, uuid.to_string()) {
        warn!(error = %e, "could not persist process uuid marker");
    }
    uuid
}

/// A cloneable, `Send + Sync` front for the database engine. All queries
/// are submitted as boxed closures and run serially inside the engine's
/// task; `query` marshals the typed result back through a `Request`.
#[derive(Clone)]
pub struct DatabaseHandle {
    cmd_tx: mpsc::Sender<Job>,
}

impl DatabaseHandle {
    /// Read calls return an empty/None result on failure; mutating calls
    /// return false. Failures are logged inside `query`, never thrown.
    pub async fn query<T, F, Fut>(&self, f: F) -> Result<T, RequestError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, sqlx::Error>> + Send + 'static,
    {
        let (waiter, responder) = request::channel::<T>(request::DEFAULT_TIMEOUT);
        let job: Job = Box::new(move |pool| {
            Box::pin(async move {
                match pool {
                    None => responder.failed(RequestError::DbFailed),
                    Some(pool) => match f(pool).await {
                        Ok(value) => responder.success(value),
                        Err(e) => {
                            error!(error = %e, "query failed");
                            responder.failed(RequestError::DbFailed);
                        }
                    },
                }
            })
        });
        if self.cmd_tx.send(job).await.is_err() {
            return Err(RequestError::DbFailed);
        }
        waiter.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_timeout_is_ten_seconds() {
        assert_eq!(DatabaseConfig::default().idle_timeout, Duration::from_secs(10));
    }
}
