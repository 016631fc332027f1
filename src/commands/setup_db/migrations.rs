use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use rusqlite::{Connection, params};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub name: String,
    pub order: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRun {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn ensure_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS applied_migrations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              migration_name TEXT NOT NULL UNIQUE,
              applied_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to create applied_migrations table")
}

pub fn applied_migration_names(connection: &Connection) -> Result<HashSet<String>> {
    let mut statement = connection
        .prepare("SELECT migration_name FROM applied_migrations")
        .context("failed to read applied migrations")?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

/// Lists `*.sql` scripts ordered by numeric prefix; unnumbered scripts sort last.
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationScript>> {
    let prefix = Regex::new(r"^(\d+)_").context("failed to compile migration prefix regex")?;

    let entries = fs::read_dir(migrations_dir)
        .with_context(|| format!("failed to read {}", migrations_dir.display()))?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", migrations_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_sql = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("sql"))
            .unwrap_or(false);
        if !is_sql {
            continue;
        }

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        scripts.push(MigrationScript {
            order: migration_order(name, &prefix),
            name: name.to_string(),
            path: path.clone(),
        });
    }

    scripts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    Ok(scripts)
}

fn migration_order(name: &str, prefix: &Regex) -> u64 {
    prefix
        .captures(name)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}

/// Statements of a script, split on `;` with blank pieces dropped.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// Applies every script in `migrations_dir` not yet recorded in
/// `applied_migrations`. Pending scripts and their tracking rows share one
/// transaction, so a failure leaves no trace of the run.
pub fn apply_pending(connection: &mut Connection, migrations_dir: &Path) -> Result<MigrationRun> {
    ensure_migrations_table(connection)?;
    let already_applied = applied_migration_names(connection)?;
    let scripts = discover_migrations(migrations_dir)?;

    let mut run = MigrationRun::default();
    let tx = connection.transaction()?;

    for script in scripts {
        if already_applied.contains(&script.name) {
            info!(migration = %script.name, "skipping already applied migration");
            run.skipped.push(script.name);
            continue;
        }

        info!(migration = %script.name, "applying migration");
        let sql = fs::read_to_string(&script.path)
            .with_context(|| format!("failed to read {}", script.path.display()))?;

        for (index, statement) in split_statements(&sql).into_iter().enumerate() {
            tx.execute_batch(statement).with_context(|| {
                format!(
                    "migration {} failed at statement {}",
                    script.name,
                    index + 1
                )
            })?;
        }

        tx.execute(
            "INSERT INTO applied_migrations(migration_name, applied_at) VALUES(?1, ?2)",
            params![script.name, Utc::now()],
        )
        .with_context(|| format!("failed to record migration {}", script.name))?;

        info!(migration = %script.name, "migration applied");
        run.applied.push(script.name);
    }

    tx.commit().context("failed to commit migrations")?;
    Ok(run)
}
