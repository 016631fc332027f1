use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Transaction, params};

use super::datasets::Dataset;
use super::grid::{Cell, Grid, cell_at, read_grid};
use crate::model::{EmployerRecord, Extraction, ReportingPeriod};

const HEADER_ROW: usize = 1;
const DATA_START_ROW: usize = 2;
const NOTES_MARKER: &str = "Notes:";

const PROVINCE: &str = "Province/Territory";
const PROGRAM_STREAM: &str = "Program Stream";
const EMPLOYER: &str = "Employer";
const ADDRESS: &str = "Address";
const OCCUPATION: &str = "Occupation";
const INCORPORATE_STATUS: &str = "Incorporate Status";
const APPROVED_LMIAS: &str = "Approved LMIAs";
const APPROVED_POSITIONS: &str = "Approved Positions";

pub struct EmployersDataset;

impl Dataset for EmployersDataset {
    type Record = EmployerRecord;

    fn name(&self) -> &'static str {
        "employers"
    }

    fn extract(&self, path: &Path, period: ReportingPeriod) -> Extraction<EmployerRecord> {
        let rows = read_grid(path).and_then(|grid| extract_employer_rows(&grid, period));
        match rows {
            Ok(rows) if rows.is_empty() => Extraction::Empty,
            Ok(rows) => Extraction::Rows(rows),
            Err(err) => Extraction::Failed(format!("{err:#}")),
        }
    }

    fn insert(
        &self,
        tx: &Transaction<'_>,
        records: &[EmployerRecord],
        import_file_id: i64,
    ) -> Result<usize> {
        insert_employer_rows(tx, records, import_file_id)
    }
}

/// Index of the first row at or after the data start whose first cell is
/// the notes marker, or the grid length when there is none.
pub fn data_end_row(grid: &Grid) -> usize {
    (DATA_START_ROW..grid.len())
        .find(|&row| {
            cell_at(grid, row, 0)
                .as_text()
                .map(|text| text.trim_start().starts_with(NOTES_MARKER))
                .unwrap_or(false)
        })
        .unwrap_or(grid.len())
}

pub fn header_labels(grid: &Grid) -> Result<Vec<String>> {
    let Some(header_row) = grid.get(HEADER_ROW) else {
        bail!("sheet has {} rows; expected a description row and a header row", grid.len());
    };

    Ok(header_row
        .iter()
        .enumerate()
        .map(|(index, cell)| header_label(index, cell))
        .collect())
}

fn header_label(index: usize, cell: &Cell) -> String {
    let label = match cell {
        Cell::Empty => String::new(),
        Cell::Text(text) => text.trim().to_string(),
        Cell::Int(number) => number.to_string(),
        Cell::Float(number) => format_float_label(*number),
        Cell::Bool(true) => "True".to_string(),
        Cell::Bool(false) => "False".to_string(),
        Cell::Other(text) => text.trim().to_string(),
    };

    if label.is_empty() {
        format!("Column_{index}")
    } else {
        label
    }
}

fn format_float_label(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 {
        format!("{number:.1}")
    } else {
        number.to_string()
    }
}

pub fn extract_employer_rows(grid: &Grid, period: ReportingPeriod) -> Result<Vec<EmployerRecord>> {
    let headers = header_labels(grid)?;

    let mut columns: HashMap<&str, usize> = HashMap::new();
    for (index, label) in headers.iter().enumerate() {
        columns.entry(label.as_str()).or_insert(index);
    }

    let lookup = |row: usize, label: &str| column_cell(grid, &columns, row, label);

    let end = data_end_row(grid);
    let records = (DATA_START_ROW..end)
        .filter(|&row| !is_blank_row(grid, row))
        .map(|row| EmployerRecord {
            province: text_field(lookup(row, PROVINCE)),
            program_stream: text_field(lookup(row, PROGRAM_STREAM)),
            employer: text_field(lookup(row, EMPLOYER)),
            address: text_field(lookup(row, ADDRESS)),
            occupation: text_field(lookup(row, OCCUPATION)),
            incorporate_status: text_field(lookup(row, INCORPORATE_STATUS)),
            approved_lmias: count_field(lookup(row, APPROVED_LMIAS)),
            approved_positions: count_field(lookup(row, APPROVED_POSITIONS)),
            year: period.year,
            quarter: period.quarter,
        })
        .collect();

    Ok(records)
}

fn is_blank_row(grid: &Grid, row: usize) -> bool {
    grid.get(row)
        .is_none_or(|cells| cells.iter().all(Cell::is_blank))
}

fn column_cell<'g>(
    grid: &'g Grid,
    columns: &HashMap<&str, usize>,
    row: usize,
    label: &str,
) -> Option<&'g Cell> {
    columns.get(label).map(|&column| cell_at(grid, row, column))
}

/// Text cells only, trimmed; every other cell kind is missing.
pub fn text_field(cell: Option<&Cell>) -> Option<String> {
    cell.and_then(Cell::as_text)
        .map(|text| text.trim().to_string())
}

/// Whole count from a cell: fractions truncate, anything unusable is 0.
pub fn count_field(cell: Option<&Cell>) -> i64 {
    let value = match cell {
        Some(Cell::Int(number)) => *number,
        Some(Cell::Float(number)) => truncate_float(*number),
        Some(Cell::Text(text)) => parse_count_text(text),
        _ => 0,
    };
    value.max(0)
}

fn truncate_float(number: f64) -> i64 {
    if number.is_finite() {
        number.trunc() as i64
    } else {
        0
    }
}

fn parse_count_text(text: &str) -> i64 {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(number) = cleaned.parse::<i64>() {
        return number;
    }
    cleaned.parse::<f64>().map(truncate_float).unwrap_or(0)
}

pub fn insert_employer_rows(
    tx: &Transaction<'_>,
    records: &[EmployerRecord],
    import_file_id: i64,
) -> Result<usize> {
    let mut statement = tx
        .prepare(
            "
            INSERT INTO employers(
              province, program_stream, employer, address, occupation,
              incorporate_status, approved_lmias, approved_positions,
              year, quarter, import_file_id
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
        )
        .context("failed to prepare employer insert")?;

    for (index, record) in records.iter().enumerate() {
        statement
            .execute(params![
                record.province,
                record.program_stream,
                record.employer,
                record.address,
                record.occupation,
                record.incorporate_status,
                record.approved_lmias,
                record.approved_positions,
                record.year,
                record.quarter,
                import_file_id,
            ])
            .with_context(|| format!("failed to insert employer row {}", index + 1))?;
    }

    Ok(records.len())
}
