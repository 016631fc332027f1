use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Transaction, params};
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

use super::*;
use crate::commands::setup_db::apply_pending;
use crate::db::count_rows;
use crate::model::{Extraction, ReportingPeriod};

const RELEASE_CSV: &str = "\
\"Positive Labour Market Impact Assessment (LMIA) employers, 2024 Q3\",,,,,,,
Province/Territory,Program Stream,Employer,Address,Occupation,Incorporate Status,Approved LMIAs,Approved Positions
Ontario,High-wage,Acme Ltd,\"1 Main St, Toronto, ON M5V 1A1\",72410-Electricians,Yes,1,2
Quebec,Low-wage,Birch Co,\"22 Rue Ste-Catherine, Montreal, QC H2X 1K4\",65201-Food counter attendants,No,12.0,3
Alberta,Agricultural stream,Cedar Farms,\"Box 7, Lethbridge, AB T1J 0A1\",85100-Livestock labourers,Yes,,
Notes:,,,,,,,
1. Counts are preliminary,,,,,,,
";

const HEADER_ONLY_CSV: &str = "\
Description,,
Province/Territory,Employer,Approved LMIAs
Notes: nothing approved this quarter,,
";

struct Workspace {
    _dir: TempDir,
    data_root: PathBuf,
    db: DbConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let data_root = dir.path().join("data");
        let db = DbConfig::new(dir.path().join("lmia.sqlite"));

        let mut connection = db.connect().expect("connect");
        apply_pending(
            &mut connection,
            &Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        )
        .expect("migrate");

        Self {
            _dir: dir,
            data_root,
            db,
        }
    }

    fn add_file(&self, dataset_name: &str, file_name: &str, contents: &[u8]) {
        let dir = self.data_root.join(dataset_name);
        fs::create_dir_all(&dir).expect("dataset dir");
        fs::write(dir.join(file_name), contents).expect("write source file");
    }

    fn process(&self, registry: &DatasetRegistry, dataset_name: &str, mode: ImportMode) -> Vec<FileReport> {
        process_dataset(&self.db, registry, &self.data_root, dataset_name, mode).expect("process")
    }

    fn count(&self, sql: &str) -> i64 {
        let connection = self.db.connect().expect("connect");
        count_rows(&connection, sql).expect("count")
    }
}

/// Release workbook with no description text, so the first used row is the header.
fn release_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let header = [
        "Province/Territory",
        "Program Stream",
        "Employer",
        "Address",
        "Occupation",
        "Incorporate Status",
        "Approved LMIAs",
        "Approved Positions",
    ];
    for (column, label) in header.iter().enumerate() {
        sheet.write_string(1, column as u16, *label).expect("write header");
    }

    let rows = [
        ("Ontario", "Acme Ltd", 1.0, 2.0),
        ("Quebec", "Birch Co", 12.0, 3.7),
    ];
    for (index, (province, employer, lmias, positions)) in rows.iter().enumerate() {
        let row = index as u32 + 2;
        sheet.write_string(row, 0, *province).expect("write");
        sheet.write_string(row, 2, *employer).expect("write");
        sheet.write_number(row, 6, *lmias).expect("write");
        sheet.write_number(row, 7, *positions).expect("write");
    }
    sheet.write_string(5, 0, "Notes:").expect("write");
    sheet.write_string(6, 0, "1. Counts are preliminary").expect("write");

    workbook.save_to_buffer().expect("workbook bytes")
}

fn outcomes(reports: &[FileReport]) -> Vec<(&str, &'static str)> {
    reports
        .iter()
        .map(|report| (report.file_name.as_str(), report.outcome.label()))
        .collect()
}

struct RejectingDataset;

impl Dataset for RejectingDataset {
    type Record = i64;

    fn name(&self) -> &'static str {
        "broken"
    }

    fn extract(&self, _path: &Path, _period: ReportingPeriod) -> Extraction<i64> {
        Extraction::Rows(vec![4, 5, -1])
    }

    fn insert(&self, tx: &Transaction<'_>, records: &[i64], import_file_id: i64) -> Result<usize> {
        for approved in records {
            tx.execute(
                "INSERT INTO employers(approved_lmias, approved_positions, import_file_id)
                 VALUES(?1, 0, ?2)",
                params![approved, import_file_id],
            )?;
        }
        Ok(records.len())
    }
}

fn registry_with_rejecting_dataset() -> DatasetRegistry {
    let mut registry = DatasetRegistry::default();
    registry.register(RejectingDataset);
    registry
}

#[test]
fn second_run_skips_every_imported_file() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q3_pos_en.csv", RELEASE_CSV.as_bytes());
    workspace.add_file("employers", "tfwp_2024q2_pos_en.csv", RELEASE_CSV.as_bytes());
    let registry = DatasetRegistry::default();

    let first = workspace.process(&registry, "employers", ImportMode::LedgerFirst);
    assert_eq!(
        outcomes(&first),
        vec![
            ("tfwp_2024q2_pos_en.csv", "imported"),
            ("tfwp_2024q3_pos_en.csv", "imported")
        ]
    );
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 6);

    let second = workspace.process(&registry, "employers", ImportMode::LedgerFirst);
    assert!(
        second
            .iter()
            .all(|report| report.outcome == FileOutcome::SkippedAlreadyImported)
    );
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 6);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 2);
}

#[test]
fn imported_rows_carry_period_and_coerced_counts() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q3_pos_en.csv", RELEASE_CSV.as_bytes());

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::LedgerFirst);
    let FileOutcome::Imported { import_file_id, rows } = reports[0].outcome else {
        panic!("expected import, got {:?}", reports[0].outcome);
    };
    assert_eq!(rows, 3);
    assert_eq!(
        reports[0].period,
        Some(ReportingPeriod {
            year: 2024,
            quarter: 3
        })
    );
    assert_eq!(reports[0].sha256.as_ref().map(String::len), Some(64));

    let connection = workspace.db.connect().expect("connect");
    let mut statement = connection
        .prepare(
            "SELECT employer, address, approved_lmias, approved_positions, year, quarter, import_file_id
             FROM employers ORDER BY id",
        )
        .expect("prepare");
    let loaded: Vec<(String, String, i64, i64, i32, u8, i64)> = statement
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })
        .expect("query")
        .collect::<rusqlite::Result<_>>()
        .expect("rows");

    assert_eq!(loaded[0].0, "Acme Ltd");
    assert_eq!(loaded[0].1, "1 Main St, Toronto, ON M5V 1A1");
    assert_eq!((loaded[1].2, loaded[1].3), (12, 3));
    assert_eq!((loaded[2].2, loaded[2].3), (0, 0));
    assert!(
        loaded
            .iter()
            .all(|row| row.4 == 2024 && row.5 == 3 && row.6 == import_file_id)
    );
}

#[test]
fn unparseable_names_are_skipped_before_any_side_effect() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "random_file.csv", RELEASE_CSV.as_bytes());
    workspace.add_file("employers", "tfwp_1999q1_x.csv", RELEASE_CSV.as_bytes());
    workspace.add_file("employers", "readme.txt", b"not a source file");

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::LedgerFirst);

    assert_eq!(
        outcomes(&reports),
        vec![
            ("random_file.csv", "skipped_unparseable_name"),
            ("tfwp_1999q1_x.csv", "skipped_unparseable_name")
        ]
    );
    assert_eq!(reports[0].period, None);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 0);
}

#[test]
fn release_without_data_rows_is_not_recorded() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q1_pos_en.csv", HEADER_ONLY_CSV.as_bytes());

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::LedgerFirst);

    assert_eq!(reports[0].outcome, FileOutcome::SkippedNoRows);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 0);
}

#[test]
fn unreadable_workbook_is_an_extraction_failure() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q1_pos_en.xlsx", b"definitely not a workbook");
    workspace.add_file("employers", "tfwp_2024q2_pos_en.csv", RELEASE_CSV.as_bytes());

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::LedgerFirst);

    assert_eq!(
        outcomes(&reports),
        vec![
            ("tfwp_2024q1_pos_en.xlsx", "extraction_failed"),
            ("tfwp_2024q2_pos_en.csv", "imported")
        ]
    );
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 1);
}

#[test]
fn workbook_release_is_imported_without_blank_rows() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q2_pos_en.xlsx", &release_workbook());

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::LedgerFirst);

    assert_eq!(
        reports[0].outcome,
        FileOutcome::Imported {
            import_file_id: 1,
            rows: 2
        }
    );
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 2);
    assert_eq!(
        workspace.count("SELECT COUNT(*) FROM employers WHERE employer IS NULL"),
        0
    );
    assert_eq!(
        workspace.count(
            "SELECT approved_positions FROM employers WHERE employer = 'Birch Co' AND year = 2024 AND quarter = 2"
        ),
        3
    );
}

#[test]
fn unknown_dataset_is_rejected_per_file() {
    let workspace = Workspace::new();
    workspace.add_file("sectors", "tfwp_2024q3_sector_en.csv", RELEASE_CSV.as_bytes());

    let reports = workspace.process(&DatasetRegistry::default(), "sectors", ImportMode::LedgerFirst);

    assert_eq!(reports[0].outcome, FileOutcome::UnknownDataset);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 0);
}

#[test]
fn missing_dataset_directory_is_an_error() {
    let workspace = Workspace::new();

    let err = process_dataset(
        &workspace.db,
        &DatasetRegistry::default(),
        &workspace.data_root,
        "employers",
        ImportMode::LedgerFirst,
    )
    .expect_err("missing directory");
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn ledger_first_load_failure_keeps_ledger_entry() {
    let workspace = Workspace::new();
    workspace.add_file("broken", "tfwp_2024q3_pos_en.csv", b"ignored");
    let registry = registry_with_rejecting_dataset();

    let first = workspace.process(&registry, "broken", ImportMode::LedgerFirst);
    match &first[0].outcome {
        FileOutcome::LoadFailed { import_file_id, .. } => assert!(import_file_id.is_some()),
        other => panic!("expected load failure, got {other:?}"),
    }
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 0);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 1);

    let second = workspace.process(&registry, "broken", ImportMode::LedgerFirst);
    assert_eq!(second[0].outcome, FileOutcome::SkippedAlreadyImported);
}

#[test]
fn atomic_load_failure_leaves_file_retryable() {
    let workspace = Workspace::new();
    workspace.add_file("broken", "tfwp_2024q3_pos_en.csv", b"ignored");
    let registry = registry_with_rejecting_dataset();

    let first = workspace.process(&registry, "broken", ImportMode::Atomic);
    match &first[0].outcome {
        FileOutcome::LoadFailed { import_file_id, .. } => assert_eq!(*import_file_id, None),
        other => panic!("expected load failure, got {other:?}"),
    }
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 0);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 0);

    let second = workspace.process(&registry, "broken", ImportMode::Atomic);
    assert_eq!(second[0].outcome.label(), "load_failed");
}

#[test]
fn atomic_mode_imports_rows() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q3_pos_en.csv", RELEASE_CSV.as_bytes());

    let reports = workspace.process(&DatasetRegistry::default(), "employers", ImportMode::Atomic);

    assert_eq!(reports[0].outcome.label(), "imported");
    assert_eq!(workspace.count("SELECT COUNT(*) FROM employers"), 3);
    assert_eq!(workspace.count("SELECT COUNT(*) FROM imported_files"), 1);
}

#[test]
fn run_writes_report_and_succeeds_on_missing_directory() {
    let workspace = Workspace::new();
    workspace.add_file("employers", "tfwp_2024q3_pos_en.csv", RELEASE_CSV.as_bytes());
    let report_path = workspace.data_root.join("reports").join("run.json");

    run(
        &workspace.db,
        ExtractDataArgs {
            dataset_name: "employers".to_string(),
            data_root: workspace.data_root.clone(),
            atomic: false,
            report_path: Some(report_path.clone()),
        },
    )
    .expect("run");

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(&report_path).expect("report")).expect("json");
    assert_eq!(report["dataset_name"], "employers");
    assert_eq!(report["counts"]["imported"], 1);
    assert_eq!(report["files"][0]["outcome"]["status"], "imported");
    assert_eq!(report["files"][0]["outcome"]["rows"], 3);

    run(
        &workspace.db,
        ExtractDataArgs {
            dataset_name: "missing".to_string(),
            data_root: workspace.data_root.clone(),
            atomic: false,
            report_path: None,
        },
    )
    .expect("missing directory is reported, not fatal");
}
