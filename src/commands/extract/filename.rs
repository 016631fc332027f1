use anyhow::{Context, Result};
use regex::Regex;

use crate::model::ReportingPeriod;

const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2100;

/// Reads `tfwp_<yyyy>q<n>_<anything>.<ext>` release names.
pub struct PeriodParser {
    pattern: Regex,
}

impl PeriodParser {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"(?i)^tfwp_(\d{4})q(\d)_.*\.[a-z0-9]+$")
            .context("failed to compile release filename regex")?;
        Ok(Self { pattern })
    }

    /// `None` when the name does not follow the convention or is out of range.
    pub fn parse(&self, file_name: &str) -> Option<ReportingPeriod> {
        let captures = self.pattern.captures(file_name)?;
        let year = captures.get(1)?.as_str().parse::<i32>().ok()?;
        let quarter = captures.get(2)?.as_str().parse::<u8>().ok()?;

        if !(MIN_YEAR..=MAX_YEAR).contains(&year) || !(1..=4).contains(&quarter) {
            return None;
        }

        Some(ReportingPeriod { year, quarter })
    }
}
