//! Minimal tab separated table reader for workflow reports and bulk sheets

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// One data row keyed by column header
pub type Row = BTreeMap<String, String>;

/// Parse a table whose first non-empty line is the header
///
/// Blank lines are skipped. Short rows get empty cells; cells past the header are ignored.
pub fn parse(content: &str) -> Result<Vec<Row>> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = match lines.next() {
        Some(line) => line.split('\t').map(str::trim).collect(),
        None => return Ok(Vec::new()),
    };
    if header.iter().any(|h| h.is_empty()) {
        bail!("Empty column name in header");
    }

    Ok(lines
        .map(|line| {
            let mut cells = line.split('\t');
            header
                .iter()
                .map(|column| (column.to_string(), cells.next().unwrap_or("").trim().to_string()))
                .collect()
        })
        .collect())
}

pub fn read(path: &Path) -> Result<Vec<Row>> {
    let content = fs::read_to_string(path).with_context(|| format!("Can't read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid table {}", path.display()))
}
