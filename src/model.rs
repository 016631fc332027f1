use serde::Serialize;

/// Year and quarter a source release covers, derived from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportingPeriod {
    pub year: i32,
    pub quarter: u8,
}

/// One normalized row of the `employers` dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployerRecord {
    pub province: Option<String>,
    pub program_stream: Option<String>,
    pub employer: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub incorporate_status: Option<String>,
    pub approved_lmias: i64,
    pub approved_positions: i64,
    pub year: i32,
    pub quarter: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Commit the ledger entry before loading rows.
    LedgerFirst,
    /// Commit the ledger entry and the rows together.
    Atomic,
}

/// Result of extracting one source file.
#[derive(Debug)]
pub enum Extraction<R> {
    Rows(Vec<R>),
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Imported { import_file_id: i64, rows: usize },
    SkippedUnparseableName,
    SkippedAlreadyImported,
    SkippedNoRows,
    ExtractionFailed { reason: String },
    UnknownDataset,
    LedgerFailed { reason: String },
    LoadFailed { import_file_id: Option<i64>, reason: String },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Imported { .. } => "imported",
            Self::SkippedUnparseableName => "skipped_unparseable_name",
            Self::SkippedAlreadyImported => "skipped_already_imported",
            Self::SkippedNoRows => "skipped_no_rows",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::UnknownDataset => "unknown_dataset",
            Self::LedgerFailed { .. } => "ledger_failed",
            Self::LoadFailed { .. } => "load_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub sha256: Option<String>,
    pub period: Option<ReportingPeriod>,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractCounts {
    pub files_found: usize,
    pub imported: usize,
    pub rows_loaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExtractCounts {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut counts = Self {
            files_found: reports.len(),
            ..Self::default()
        };

        for report in reports {
            match &report.outcome {
                FileOutcome::Imported { rows, .. } => {
                    counts.imported += 1;
                    counts.rows_loaded += *rows;
                }
                FileOutcome::SkippedUnparseableName
                | FileOutcome::SkippedAlreadyImported
                | FileOutcome::SkippedNoRows => counts.skipped += 1,
                FileOutcome::ExtractionFailed { .. }
                | FileOutcome::UnknownDataset
                | FileOutcome::LedgerFailed { .. }
                | FileOutcome::LoadFailed { .. } => counts.failed += 1,
            }
        }

        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRunReport {
    pub report_version: u32,
    pub run_id: String,
    pub dataset_name: String,
    pub data_directory: String,
    pub import_mode: ImportMode,
    pub started_at: String,
    pub finished_at: String,
    pub counts: ExtractCounts,
    pub files: Vec<FileReport>,
}
