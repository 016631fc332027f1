use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};

pub fn is_imported(connection: &Connection, dataset_name: &str, file_name: &str) -> Result<bool> {
    connection
        .query_row(
            "SELECT EXISTS(
               SELECT 1 FROM imported_files WHERE dataset_name = ?1 AND file_name = ?2
             )",
            params![dataset_name, file_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check ledger for {dataset_name}/{file_name}"))
}

/// Inserts the ledger entry and returns its generated id. Callers own the
/// surrounding transaction.
pub fn record_import(connection: &Connection, dataset_name: &str, file_name: &str) -> Result<i64> {
    connection
        .execute(
            "INSERT INTO imported_files(dataset_name, file_name, imported_at) VALUES(?1, ?2, ?3)",
            params![dataset_name, file_name, Utc::now()],
        )
        .with_context(|| format!("failed to record import of {dataset_name}/{file_name}"))?;

    Ok(connection.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        connection
            .execute_batch(
                "
                CREATE TABLE imported_files (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  dataset_name TEXT NOT NULL,
                  file_name TEXT NOT NULL,
                  imported_at TEXT NOT NULL,
                  UNIQUE (dataset_name, file_name)
                );
                ",
            )
            .expect("schema");
        connection
    }

    #[test]
    fn membership_requires_exact_pair() {
        let connection = ledger();
        let id = record_import(&connection, "employers", "tfwp_2024q3_pos_en.xlsx").expect("record");
        assert!(id > 0);

        assert!(is_imported(&connection, "employers", "tfwp_2024q3_pos_en.xlsx").unwrap());
        assert!(!is_imported(&connection, "employers", "TFWP_2024Q3_POS_EN.xlsx").unwrap());
        assert!(!is_imported(&connection, "other", "tfwp_2024q3_pos_en.xlsx").unwrap());
    }

    #[test]
    fn record_returns_distinct_ids() {
        let connection = ledger();
        let first = record_import(&connection, "employers", "a.csv").expect("first");
        let second = record_import(&connection, "employers", "b.csv").expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let connection = ledger();
        record_import(&connection, "employers", "a.csv").expect("first");
        assert!(record_import(&connection, "employers", "a.csv").is_err());
    }

    #[test]
    fn missing_table_surfaces_as_error() {
        let connection = Connection::open_in_memory().expect("open");
        assert!(is_imported(&connection, "employers", "a.csv").is_err());
    }
}
