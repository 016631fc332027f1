use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

/// Connection parameters shared by every database interaction of a run.
#[derive(Debug, Clone)]
pub struct DbConfig {
    path: PathBuf,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh connection; callers drop it when their interaction ends.
    pub fn connect(&self) -> Result<Connection> {
        let connection = Connection::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        configure_connection(&connection)?;
        Ok(connection)
    }

    fn probe(&self) -> Result<()> {
        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("failed to open {}", self.path.display()))?;
        connection
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("connectivity probe failed")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(2),
        }
    }
}

/// Polls the database until a probe succeeds or the attempts run out.
pub fn wait_for_database(config: &DbConfig, policy: WaitPolicy) -> bool {
    info!(path = %config.path().display(), "waiting for database to become available");

    for attempt in 1..=policy.max_attempts {
        match config.probe() {
            Ok(()) => {
                info!(attempt, "database is available");
                return true;
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "database not available yet"
                );
                if attempt < policy.max_attempts {
                    thread::sleep(policy.delay);
                }
            }
        }
    }

    false
}

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to set foreign_keys=ON")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to run count query: {sql}"))?;
    Ok(count)
}
