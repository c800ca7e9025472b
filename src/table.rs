use crate::error::{Result, RevenueError};
use crate::utils::{parse_amount_text, parse_sheet_date, ParseOutcome};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

static EMPTY_CELL: Cell = Cell::Empty;

/// A single spreadsheet value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Raw sheet values arrive as strings; blank strings become `Empty`.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(raw.to_string())
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Number(_) => false,
            Cell::Text(s) => s.trim().is_empty(),
        }
    }

    /// Trimmed textual form; numbers use their shortest decimal rendering.
    pub fn trimmed(&self) -> String {
        self.to_string().trim().to_string()
    }

    pub fn amount(&self) -> ParseOutcome<f64> {
        match self {
            Cell::Empty => ParseOutcome::Defaulted,
            Cell::Number(value) => ParseOutcome::Parsed(*value),
            Cell::Text(s) => parse_amount_text(s),
        }
    }

    pub fn date(&self) -> ParseOutcome<NaiveDate> {
        match self {
            Cell::Text(s) => parse_sheet_date(s),
            _ => ParseOutcome::Defaulted,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Number(value) => write!(f, "{}", value),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::from_raw(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::from_raw(&value)
    }
}

/// The value grid of one worksheet, exactly as the store hands it over.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSheet {
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A header-tagged rectangular table. Rows above the header in the source
/// sheet are kept as metadata rows and written back in front of the header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    name: String,
    metadata_rows: Vec<Vec<Cell>>,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            metadata_rows: Vec::new(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from a raw grid whose header sits at `header_row`.
    /// Blank header cells are named `col_<i>`.
    pub fn from_raw(name: impl Into<String>, raw: &RawSheet, header_row: usize) -> Self {
        let width = raw.width();
        let mut table = Table::new(name, Vec::new());

        if raw.rows.len() <= header_row {
            table.metadata_rows = raw
                .rows
                .iter()
                .map(|row| row.iter().map(|v| Cell::from_raw(v)).collect())
                .collect();
            return table;
        }

        table.metadata_rows = raw.rows[..header_row]
            .iter()
            .map(|row| row.iter().map(|v| Cell::from_raw(v)).collect())
            .collect();

        let header = &raw.rows[header_row];
        table.columns = (0..width)
            .map(|i| match header.get(i) {
                Some(h) if !h.trim().is_empty() => h.clone(),
                _ => format!("col_{}", i),
            })
            .collect();

        for row in &raw.rows[header_row + 1..] {
            let mut cells: Vec<Cell> = row.iter().map(|v| Cell::from_raw(v)).collect();
            cells.resize(width, Cell::Empty);
            table.rows.push(cells);
        }

        table
    }

    /// Renders metadata rows, header, and data rows back into a raw grid.
    pub fn to_raw(&self) -> RawSheet {
        let width = self.width();
        let render = |row: &Vec<Cell>| -> Vec<String> {
            let mut values: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            values.resize(width.max(values.len()), String::new());
            values
        };

        let mut rows: Vec<Vec<String>> = self.metadata_rows.iter().map(render).collect();
        rows.push(self.columns.clone());
        rows.extend(self.rows.iter().map(render));
        RawSheet::new(rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn metadata_rows(&self) -> &[Vec<Cell>] {
        &self.metadata_rows
    }

    pub fn set_metadata_rows(&mut self, rows: Vec<Vec<Cell>>) {
        self.metadata_rows = rows;
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header lookup ignores surrounding whitespace, so `"Start Date "` and
    /// `"Start Date"` name the same column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.columns.iter().position(|c| c.trim() == wanted)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| RevenueError::MissingColumn {
                table: self.name.clone(),
                column: name.trim().to_string(),
            })
    }

    /// Returns the index of `name`, appending an empty column if absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.trim().to_string());
        for row in &mut self.rows {
            row.push(Cell::Empty);
        }
        self.columns.len() - 1
    }

    pub fn get(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Writes a cell, growing the table if `row` is past the end.
    pub fn set(&mut self, row: usize, col: usize, value: impl Into<Cell>) {
        self.ensure_row_count(row + 1);
        if col >= self.columns.len() {
            return;
        }
        self.rows[row][col] = value.into();
    }

    pub fn ensure_row_count(&mut self, count: usize) {
        let width = self.width();
        while self.rows.len() < count {
            self.rows.push(vec![Cell::Empty; width]);
        }
    }

    pub fn push_row(&mut self, mut cells: Vec<Cell>) {
        cells.resize(self.width(), Cell::Empty);
        self.rows.push(cells);
    }

    pub fn fill_column(&mut self, col: usize, value: Cell) {
        for row in &mut self.rows {
            if let Some(cell) = row.get_mut(col) {
                *cell = value.clone();
            }
        }
    }

    pub fn column_cells(&self, col: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |r| r.get(col).unwrap_or(&EMPTY_CELL))
    }

    /// Drops rows that repeat an earlier row cell for cell. Returns the
    /// number of rows removed.
    pub fn drop_duplicate_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        self.rows
            .retain(|row| seen.insert(row.iter().map(|c| c.to_string()).collect()));
        before - self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_from_raw_promotes_header_and_keeps_metadata() {
        let sheet = raw(&[
            &["FY 25-26 accrual", ""],
            &["Customer Name", "Invoice", ""],
            &["Acme", "INV-25-26-000001"],
        ]);

        let table = Table::from_raw("ledger", &sheet, 1);
        assert_eq!(table.metadata_rows().len(), 1);
        assert_eq!(table.columns(), &["Customer Name", "Invoice", "col_2"]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.get(0, 2), &Cell::Empty);

        let round = table.to_raw();
        assert_eq!(round.rows.len(), 3);
        assert_eq!(round.rows[0][0], "FY 25-26 accrual");
        assert_eq!(round.rows[1][0], "Customer Name");
    }

    #[test]
    fn test_column_lookup_ignores_padding() {
        let table = Table::new("t", vec!["Start Date ".into(), " Contract Amount ".into()]);
        assert_eq!(table.column_index("Start Date"), Some(0));
        assert_eq!(table.column_index("Contract Amount"), Some(1));
        assert!(matches!(
            table.require_column("End Date"),
            Err(RevenueError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_set_grows_rows_and_ensure_column_is_stable() {
        let mut table = Table::new("t", vec!["A".into()]);
        let b = table.ensure_column("B");
        assert_eq!(table.ensure_column("B "), b);
        table.set(3, b, 2.5);
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.get(3, b), &Cell::Number(2.5));
        assert!(table.get(10, 10).is_blank());
    }

    #[test]
    fn test_cell_amount_and_display() {
        assert_eq!(Cell::Number(1234.5).amount(), ParseOutcome::Parsed(1234.5));
        assert_eq!(Cell::text("1,234.50").amount(), ParseOutcome::Parsed(1234.5));
        assert_eq!(Cell::Empty.amount(), ParseOutcome::Defaulted);
        assert_eq!(Cell::Number(4500.0).to_string(), "4500");
        assert_eq!(Cell::from_raw("  "), Cell::Empty);
    }

    #[test]
    fn test_drop_duplicate_rows() {
        let mut table = Table::new("t", vec!["A".into(), "B".into()]);
        table.push_row(vec![Cell::text("x"), Cell::text("1")]);
        table.push_row(vec![Cell::text("x"), Cell::text("1")]);
        table.push_row(vec![Cell::text("x"), Cell::text("2")]);
        assert_eq!(table.drop_duplicate_rows(), 1);
        assert_eq!(table.row_count(), 2);
    }
}
