use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use crate::db::{DbConfig, count_rows};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub dataset_name: String,
    pub files: i64,
    pub last_imported_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodStatus {
    pub year: Option<i32>,
    pub quarter: Option<u8>,
    pub rows: i64,
}

pub fn run(db: &DbConfig) -> Result<()> {
    if !db.path().exists() {
        warn!(path = %db.path().display(), "database file missing");
        return Ok(());
    }

    let connection = db.connect()?;
    info!(path = %db.path().display(), "status requested");

    if !table_exists(&connection, "applied_migrations")? {
        warn!("no migrations have been applied; run setup-db first");
        return Ok(());
    }

    let migrations = count_rows(&connection, "SELECT COUNT(*) FROM applied_migrations")?;
    let latest_migration: Option<String> = connection
        .query_row(
            "SELECT migration_name FROM applied_migrations ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read latest migration")?;
    info!(
        applied = migrations,
        latest = %latest_migration.unwrap_or_default(),
        "migrations"
    );

    if table_exists(&connection, "imported_files")? {
        for dataset in dataset_statuses(&connection)? {
            info!(
                dataset = %dataset.dataset_name,
                files = dataset.files,
                last_imported_at = %dataset.last_imported_at.unwrap_or_default(),
                "imported files"
            );
        }
    }

    if table_exists(&connection, "employers")? {
        for period in employer_periods(&connection)? {
            info!(
                year = ?period.year,
                quarter = ?period.quarter,
                rows = period.rows,
                "employer rows"
            );
        }
    }

    Ok(())
}

fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to inspect schema for table {table_name}"))
}

pub fn dataset_statuses(connection: &Connection) -> Result<Vec<DatasetStatus>> {
    let mut statement = connection.prepare(
        "
        SELECT dataset_name, COUNT(*), MAX(imported_at)
        FROM imported_files
        GROUP BY dataset_name
        ORDER BY dataset_name
        ",
    )?;

    let statuses = statement
        .query_map([], |row| {
            Ok(DatasetStatus {
                dataset_name: row.get(0)?,
                files: row.get(1)?,
                last_imported_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(statuses)
}

pub fn employer_periods(connection: &Connection) -> Result<Vec<PeriodStatus>> {
    let mut statement = connection.prepare(
        "
        SELECT year, quarter, COUNT(*)
        FROM employers
        GROUP BY year, quarter
        ORDER BY year, quarter
        ",
    )?;

    let periods = statement
        .query_map([], |row| {
            Ok(PeriodStatus {
                year: row.get(0)?,
                quarter: row.get(1)?,
                rows: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(periods)
}
