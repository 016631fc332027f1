use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Transaction;
use tracing::{error, info, warn};

use super::employers::EmployersDataset;
use super::ledger::record_import;
use crate::db::DbConfig;
use crate::model::{Extraction, FileOutcome, ImportMode, ReportingPeriod};

/// One category of source files: how to read them and where their rows go.
pub trait Dataset {
    type Record;

    fn name(&self) -> &'static str;

    fn extract(&self, path: &Path, period: ReportingPeriod) -> Extraction<Self::Record>;

    /// Inserts every record inside `tx`; the caller commits.
    fn insert(
        &self,
        tx: &Transaction<'_>,
        records: &[Self::Record],
        import_file_id: i64,
    ) -> Result<usize>;
}

/// A source file that passed name parsing and the ledger check.
pub struct SourceFile<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub period: ReportingPeriod,
}

/// Runs extract, record and load for one file of a registered dataset.
pub trait FileImporter {
    fn dataset_name(&self) -> &'static str;

    fn import_file(&self, db: &DbConfig, mode: ImportMode, source: &SourceFile<'_>) -> FileOutcome;
}

impl<D: Dataset> FileImporter for D {
    fn dataset_name(&self) -> &'static str {
        self.name()
    }

    fn import_file(&self, db: &DbConfig, mode: ImportMode, source: &SourceFile<'_>) -> FileOutcome {
        let records = match self.extract(source.path, source.period) {
            Extraction::Rows(records) => records,
            Extraction::Empty => {
                info!(file = %source.file_name, "no data extracted");
                return FileOutcome::SkippedNoRows;
            }
            Extraction::Failed(reason) => {
                warn!(path = %source.path.display(), reason = %reason, "extraction failed");
                return FileOutcome::ExtractionFailed { reason };
            }
        };

        info!(file = %source.file_name, rows = records.len(), "extracted rows");

        match mode {
            ImportMode::LedgerFirst => record_then_load(self, db, source, &records),
            ImportMode::Atomic => record_and_load(self, db, source, &records),
        }
    }
}

fn record_then_load<D: Dataset>(
    dataset: &D,
    db: &DbConfig,
    source: &SourceFile<'_>,
    records: &[D::Record],
) -> FileOutcome {
    let import_file_id = match record_committed(db, dataset.name(), source.file_name) {
        Ok(id) => id,
        Err(err) => {
            let reason = format!("{err:#}");
            error!(file = %source.file_name, error = %reason, "failed to record file import");
            return FileOutcome::LedgerFailed { reason };
        }
    };

    match load_committed(db, dataset, records, import_file_id) {
        Ok(rows) => {
            info!(file = %source.file_name, rows, import_file_id, "imported rows");
            FileOutcome::Imported {
                import_file_id,
                rows,
            }
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(
                file = %source.file_name,
                import_file_id,
                error = %reason,
                "failed to load rows; ledger entry remains"
            );
            FileOutcome::LoadFailed {
                import_file_id: Some(import_file_id),
                reason,
            }
        }
    }
}

fn record_and_load<D: Dataset>(
    dataset: &D,
    db: &DbConfig,
    source: &SourceFile<'_>,
    records: &[D::Record],
) -> FileOutcome {
    match record_and_load_committed(db, dataset, source.file_name, records) {
        Ok((import_file_id, rows)) => {
            info!(file = %source.file_name, rows, import_file_id, "imported rows");
            FileOutcome::Imported {
                import_file_id,
                rows,
            }
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(file = %source.file_name, error = %reason, "failed to import file; nothing recorded");
            FileOutcome::LoadFailed {
                import_file_id: None,
                reason,
            }
        }
    }
}

fn record_committed(db: &DbConfig, dataset_name: &str, file_name: &str) -> Result<i64> {
    let mut connection = db.connect()?;
    let tx = connection.transaction()?;
    let id = record_import(&tx, dataset_name, file_name)?;
    tx.commit().context("failed to commit ledger entry")?;
    Ok(id)
}

fn load_committed<D: Dataset>(
    db: &DbConfig,
    dataset: &D,
    records: &[D::Record],
    import_file_id: i64,
) -> Result<usize> {
    let mut connection = db.connect()?;
    let tx = connection.transaction()?;
    let rows = dataset.insert(&tx, records, import_file_id)?;
    tx.commit().context("failed to commit row batch")?;
    Ok(rows)
}

fn record_and_load_committed<D: Dataset>(
    db: &DbConfig,
    dataset: &D,
    file_name: &str,
    records: &[D::Record],
) -> Result<(i64, usize)> {
    let mut connection = db.connect()?;
    let tx = connection.transaction()?;
    let import_file_id = record_import(&tx, dataset.name(), file_name)?;
    let rows = dataset.insert(&tx, records, import_file_id)?;
    tx.commit().context("failed to commit import")?;
    Ok((import_file_id, rows))
}

/// Dataset name to importer. `employers` is always registered.
pub struct DatasetRegistry {
    importers: BTreeMap<&'static str, Box<dyn FileImporter>>,
}

impl DatasetRegistry {
    pub fn empty() -> Self {
        Self {
            importers: BTreeMap::new(),
        }
    }

    pub fn register<D: Dataset + 'static>(&mut self, dataset: D) {
        self.importers.insert(dataset.name(), Box::new(dataset));
    }

    pub fn get(&self, dataset_name: &str) -> Option<&dyn FileImporter> {
        self.importers.get(dataset_name).map(|importer| importer.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.importers.keys().copied().collect()
    }
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(EmployersDataset);
        registry
    }
}
