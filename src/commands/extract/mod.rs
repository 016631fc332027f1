use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cli::ExtractDataArgs;
use crate::db::DbConfig;
use crate::model::{ExtractCounts, ExtractRunReport, FileOutcome, FileReport, ImportMode};
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

mod datasets;
mod employers;
mod filename;
mod grid;
mod ledger;
#[cfg(test)]
mod tests;

pub use datasets::{Dataset, DatasetRegistry};

use datasets::SourceFile;
use filename::PeriodParser;
use grid::SourceFormat;
use ledger::is_imported;

pub fn run(db: &DbConfig, args: ExtractDataArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));
    let mode = args.import_mode();
    let data_dir = args.data_root.join(&args.dataset_name);

    info!(
        dataset = %args.dataset_name,
        data_dir = %data_dir.display(),
        run_id = %run_id,
        "starting extraction"
    );

    let registry = DatasetRegistry::default();
    let files = match process_dataset(db, &registry, &args.data_root, &args.dataset_name, mode) {
        Ok(files) => files,
        Err(err) => {
            error!(dataset = %args.dataset_name, error = %format!("{err:#}"), "extraction aborted");
            Vec::new()
        }
    };

    let counts = ExtractCounts::from_reports(&files);
    info!(
        dataset = %args.dataset_name,
        files = counts.files_found,
        imported = counts.imported,
        rows = counts.rows_loaded,
        skipped = counts.skipped,
        failed = counts.failed,
        "finished processing dataset"
    );

    if let Some(report_path) = &args.report_path {
        let report = ExtractRunReport {
            report_version: 1,
            run_id,
            dataset_name: args.dataset_name.clone(),
            data_directory: data_dir.display().to_string(),
            import_mode: mode,
            started_at,
            finished_at: now_utc_string(),
            counts,
            files,
        };
        match write_json_pretty(report_path, &report) {
            Ok(()) => info!(path = %report_path.display(), "wrote run report"),
            Err(err) => error!(path = %report_path.display(), error = %format!("{err:#}"), "failed to write run report"),
        }
    }

    Ok(())
}

/// Imports every new file under `<data_root>/<dataset_name>/`, one at a time.
/// Per-file problems land in the returned reports; only an unusable data
/// directory is an error.
pub fn process_dataset(
    db: &DbConfig,
    registry: &DatasetRegistry,
    data_root: &Path,
    dataset_name: &str,
    mode: ImportMode,
) -> Result<Vec<FileReport>> {
    let data_dir = data_root.join(dataset_name);
    if !data_dir.is_dir() {
        bail!("directory {} does not exist", data_dir.display());
    }

    let candidates = discover_source_files(&data_dir)?;
    if candidates.is_empty() {
        info!(data_dir = %data_dir.display(), "no source files found");
        return Ok(Vec::new());
    }

    info!(count = candidates.len(), data_dir = %data_dir.display(), "found source files");

    let parser = PeriodParser::new()?;
    let mut reports = Vec::with_capacity(candidates.len());

    for path in candidates {
        let Some(file_name) = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
        else {
            warn!(path = %path.display(), "skipping file with non UTF-8 name");
            continue;
        };

        let sha256 = match sha256_file(&path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(file = %file_name, error = %format!("{err:#}"), "failed to hash source file");
                None
            }
        };

        let period = parser.parse(&file_name);
        let outcome = match period {
            None => {
                warn!(file = %file_name, "filename does not carry a year and quarter; skipping");
                FileOutcome::SkippedUnparseableName
            }
            Some(period) => {
                let source = SourceFile {
                    path: &path,
                    file_name: &file_name,
                    period,
                };
                process_file(db, registry, dataset_name, mode, &source)
            }
        };

        reports.push(FileReport {
            file_name,
            sha256,
            period,
            outcome,
        });
    }

    Ok(reports)
}

fn process_file(
    db: &DbConfig,
    registry: &DatasetRegistry,
    dataset_name: &str,
    mode: ImportMode,
    source: &SourceFile<'_>,
) -> FileOutcome {
    let already_imported = db
        .connect()
        .and_then(|connection| is_imported(&connection, dataset_name, source.file_name));

    match already_imported {
        Ok(true) => {
            info!(file = %source.file_name, "skipping file; already imported");
            return FileOutcome::SkippedAlreadyImported;
        }
        Ok(false) => {}
        Err(err) => {
            let reason = format!("{err:#}");
            error!(file = %source.file_name, error = %reason, "failed to check import ledger");
            return FileOutcome::LedgerFailed { reason };
        }
    }

    let Some(importer) = registry.get(dataset_name) else {
        error!(
            file = %source.file_name,
            dataset = %dataset_name,
            known = ?registry.names(),
            "unknown dataset type"
        );
        return FileOutcome::UnknownDataset;
    };

    info!(
        file = %source.file_name,
        dataset = importer.dataset_name(),
        year = source.period.year,
        quarter = source.period.quarter,
        "processing file"
    );
    importer.import_file(db, mode, source)
}

/// Spreadsheet and delimited-text files in `data_dir`, sorted by name.
fn discover_source_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(data_dir).with_context(|| format!("failed to read {}", data_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", data_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        if SourceFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
