use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::{debug, warn};

use crate::util::extension_lowercase;

/// A raw cell with no header semantics attached.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Other(String),
}

impl Cell {
    pub fn text(value: &str) -> Self {
        Self::Text(value.to_string())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Empty, or text that is only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => Self::Empty,
            Data::String(text) => Self::Text(text.clone()),
            Data::Int(number) => Self::Int(*number),
            Data::Float(number) => Self::Float(*number),
            Data::Bool(flag) => Self::Bool(*flag),
            other => Self::Other(other.to_string()),
        }
    }
}

pub type Grid = Vec<Vec<Cell>>;

static EMPTY_CELL: Cell = Cell::Empty;

pub fn cell_at(grid: &Grid, row: usize, column: usize) -> &Cell {
    grid.get(row)
        .and_then(|cells| cells.get(column))
        .unwrap_or(&EMPTY_CELL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension_lowercase(path)?.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

pub fn read_grid(path: &Path) -> Result<Grid> {
    match SourceFormat::from_path(path) {
        Some(SourceFormat::Xlsx) => read_workbook_grid(path),
        Some(SourceFormat::Csv) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            parse_csv_grid(&bytes)
                .with_context(|| format!("failed to parse csv {}", path.display()))
        }
        None => bail!("unsupported source file type: {}", path.display()),
    }
}

/// First worksheet, re-anchored so grid indices match sheet rows and columns.
fn read_workbook_grid(path: &Path) -> Result<Grid> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first() else {
        bail!("workbook has no sheets: {}", path.display());
    };

    let range = workbook
        .worksheet_range(sheet_name)
        .with_context(|| format!("failed to read sheet '{sheet_name}' in {}", path.display()))?;

    let (row_offset, column_offset) = range
        .start()
        .map(|(row, column)| (row as usize, column as usize))
        .unwrap_or((0, 0));

    let mut grid: Grid = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; column_offset];
        cells.extend(row.iter().map(Cell::from));
        grid.push(cells);
    }

    Ok(grid)
}

fn candidate_encodings() -> [&'static Encoding; 2] {
    [UTF_8, WINDOWS_1252]
}

/// Decodes with the first candidate encoding that reports no errors.
pub fn decode_text(bytes: &[u8]) -> String {
    for encoding in candidate_encodings() {
        let (text, used, had_errors) = encoding.decode(bytes);
        if !had_errors {
            debug!(encoding = used.name(), "decoded delimited text");
            return text.into_owned();
        }
    }

    warn!("no candidate encoding decoded cleanly; using replacement characters");
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn parse_csv_grid(bytes: &[u8]) -> Result<Grid> {
    let text = decode_text(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .double_quote(true)
        .from_reader(text.as_bytes());

    let mut grid = Grid::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed csv record {}", index + 1))?;
        grid.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::text(field)
                    }
                })
                .collect(),
        );
    }

    Ok(grid)
}
