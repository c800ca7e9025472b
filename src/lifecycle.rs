//! Subscriber lifecycle: who is active each month, who joined, who left, and
//! the begin/add/less/end roll-forward of subscriber counts.
//!
//! Each table keeps the grid it was loaded from and only rewrites the target
//! month's column, so hand-added rows and columns survive a run. Row 0 of
//! every sheet is its header row.
//!
//! - snapshot: row 0 holds month labels, names from row 1;
//! - additions/deletions: row 0 header, rows 1-2 free, row 3 label, names from row 4;
//! - roll-forward: rows 0-3 free, row 4 header, rows 5-8 begin/add/less/end.
//!
//! Only cells that parse as `Mon-YY` labels are treated as months.

use crate::error::{Result, RevenueError};
use crate::ledger::AccrualLedger;
use crate::schema::{MetricKind, PipelineConfig};
use crate::store::Workbook;
use crate::table::RawSheet;
use crate::utils::{parse_amount_text, ReportingMonth};
use log::{debug, info, warn};
use std::collections::HashSet;

const ROLL_HEADER_ROW: usize = 4;
const ROLL_BEGIN_ROW: usize = 5;
const ROLL_ADD_ROW: usize = 6;
const ROLL_LESS_ROW: usize = 7;
const ROLL_END_ROW: usize = 8;

const PARTICULARS: &str = "Particulars";
const ROW_LABELS: [&str; 4] = [
    "Opening subscribers",
    "Add: new subscribers",
    "Less: churned subscribers",
    "Closing subscribers",
];

fn is_month_label(label: &str) -> bool {
    !label.trim().is_empty() && ReportingMonth::parse(label).is_ok()
}

fn cell(rows: &[Vec<String>], row: usize, col: usize) -> &str {
    rows.get(row).and_then(|r| r.get(col)).map(String::as_str).unwrap_or("")
}

fn put(rows: &mut Vec<Vec<String>>, row: usize, col: usize, value: String) {
    if rows.len() <= row {
        rows.resize(row + 1, Vec::new());
    }
    let target = &mut rows[row];
    if target.len() <= col {
        target.resize(col + 1, String::new());
    }
    target[col] = value;
}

fn square(rows: &mut [Vec<String>]) {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in rows.iter_mut() {
        row.resize(width, String::new());
    }
}

/// Where a [`MonthlyLog`] keeps its month labels and names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLayout {
    /// Labels in the header row, names straight below.
    Snapshot,
    /// Labels repeated on row 3 with names from row 4.
    Offset,
}

impl LogLayout {
    pub fn label_row(self) -> usize {
        match self {
            LogLayout::Snapshot => 0,
            LogLayout::Offset => 3,
        }
    }

    pub fn data_row(self) -> usize {
        self.label_row() + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthEntry {
    pub label: String,
    pub column: usize,
    pub names: Vec<String>,
}

/// Per-month name lists stored one column per month. Entries are in column
/// order; a month seen for the first time is appended after the last column.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyLog {
    layout: LogLayout,
    grid: Vec<Vec<String>>,
    entries: Vec<MonthEntry>,
}

impl MonthlyLog {
    pub fn new(layout: LogLayout) -> Self {
        Self {
            layout,
            grid: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn from_sheet(sheet: &RawSheet, layout: LogLayout) -> Self {
        let mut log = Self::new(layout);
        log.grid = sheet.rows.clone();

        let labels = sheet.rows.get(layout.label_row()).cloned().unwrap_or_default();
        for (col, label) in labels.iter().enumerate() {
            let label = label.trim();
            if !is_month_label(label) || log.position(label).is_some() {
                continue;
            }
            let names = sheet
                .rows
                .iter()
                .skip(layout.data_row())
                .filter_map(|row| row.get(col))
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            log.entries.push(MonthEntry {
                label: label.to_string(),
                column: col,
                names,
            });
        }
        log
    }

    pub fn from_snapshot_sheet(sheet: &RawSheet) -> Self {
        Self::from_sheet(sheet, LogLayout::Snapshot)
    }

    pub fn from_offset_sheet(sheet: &RawSheet) -> Self {
        Self::from_sheet(sheet, LogLayout::Offset)
    }

    pub fn to_sheet(&self) -> RawSheet {
        RawSheet::new(self.grid.clone())
    }

    pub fn layout(&self) -> LogLayout {
        self.layout
    }

    pub fn entries(&self) -> &[MonthEntry] {
        &self.entries
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.label == label)
    }

    pub fn get(&self, label: &str) -> Option<&[String]> {
        self.position(label).map(|i| self.entries[i].names.as_slice())
    }

    /// Month column immediately to the left of `label`'s, ignoring
    /// non-month columns in between.
    pub fn preceding(&self, label: &str) -> Option<&MonthEntry> {
        match self.position(label)? {
            0 => None,
            i => self.entries.get(i - 1),
        }
    }

    /// Rewrites the month's column, or appends one after the last column.
    /// Other columns are left untouched.
    pub fn upsert(&mut self, label: &str, names: Vec<String>) {
        let position = self.position(label);
        let col = match position {
            Some(i) => self.entries[i].column,
            None => self.grid.iter().map(Vec::len).max().unwrap_or(0),
        };

        for row in self.grid.iter_mut() {
            if let Some(value) = row.get_mut(col) {
                value.clear();
            }
        }
        put(&mut self.grid, 0, col, label.to_string());
        put(&mut self.grid, self.layout.label_row(), col, label.to_string());
        for (i, name) in names.iter().enumerate() {
            put(&mut self.grid, self.layout.data_row() + i, col, name.clone());
        }
        square(&mut self.grid);

        match position {
            Some(i) => self.entries[i].names = names,
            None => self.entries.push(MonthEntry {
                label: label.to_string(),
                column: col,
                names,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollForwardEntry {
    pub month: String,
    pub begin: i64,
    pub add: i64,
    pub less: i64,
    pub end: i64,
}

impl RollForwardEntry {
    pub fn is_balanced(&self) -> bool {
        self.end == self.begin + self.add - self.less
    }
}

/// Subscriber count roll-forward, one month per column of the header row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RollForward {
    grid: Vec<Vec<String>>,
    columns: Vec<usize>,
    entries: Vec<RollForwardEntry>,
}

impl RollForward {
    pub fn entries(&self) -> &[RollForwardEntry] {
        &self.entries
    }

    pub fn get(&self, month: &str) -> Option<&RollForwardEntry> {
        self.entries.iter().find(|e| e.month == month)
    }

    /// Writes the month's five cells. `begin` is the closing count of the
    /// calendar-previous month's column, or 0 when there is none.
    pub fn record(&mut self, month: &ReportingMonth, add: i64, less: i64, end: i64) -> RollForwardEntry {
        let label = month.label();
        let begin = self
            .get(&month.previous().label())
            .map(|prev| prev.end)
            .unwrap_or(0);

        let entry = RollForwardEntry {
            month: label.clone(),
            begin,
            add,
            less,
            end,
        };

        let position = self.entries.iter().position(|e| e.month == label);
        let col = match position {
            Some(i) => self.columns[i],
            None => self.next_free_column(),
        };

        put(&mut self.grid, ROLL_HEADER_ROW, col, label);
        let rows = [ROLL_BEGIN_ROW, ROLL_ADD_ROW, ROLL_LESS_ROW, ROLL_END_ROW];
        for (row, value) in rows.into_iter().zip([begin, add, less, end]) {
            put(&mut self.grid, row, col, value.to_string());
        }
        let labels = std::iter::once(PARTICULARS).chain(ROW_LABELS);
        for (row, text) in (ROLL_HEADER_ROW..=ROLL_END_ROW).zip(labels) {
            if cell(&self.grid, row, 0).trim().is_empty() {
                put(&mut self.grid, row, 0, text.to_string());
            }
        }
        square(&mut self.grid);

        match position {
            Some(i) => self.entries[i] = entry.clone(),
            None => {
                self.columns.push(col);
                self.entries.push(entry.clone());
            }
        }
        entry
    }

    /// Column after the last labelled header cell, or 1 on an empty sheet.
    fn next_free_column(&self) -> usize {
        let header = self.grid.get(ROLL_HEADER_ROW).map(Vec::as_slice).unwrap_or(&[]);
        header
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, label)| {
                let label = label.trim().to_lowercase();
                !label.is_empty() && !["nan", "none", "particulars"].contains(&label.as_str())
            })
            .map(|(col, _)| col + 1)
            .last()
            .unwrap_or(1)
    }

    pub fn verify(&self) -> Result<()> {
        for entry in &self.entries {
            if !entry.is_balanced() {
                return Err(RevenueError::RollForwardViolation {
                    month: entry.month.clone(),
                    begin: entry.begin,
                    add: entry.add,
                    less: entry.less,
                    end: entry.end,
                });
            }
        }
        Ok(())
    }

    pub fn from_sheet(sheet: &RawSheet) -> Self {
        let mut roll = RollForward {
            grid: sheet.rows.clone(),
            ..Default::default()
        };

        let count = |row: usize, col: usize| -> i64 {
            parse_amount_text(cell(&sheet.rows, row, col)).or(0.0).round() as i64
        };

        let header = sheet.rows.get(ROLL_HEADER_ROW).cloned().unwrap_or_default();
        for (col, label) in header.iter().enumerate().skip(1) {
            let label = label.trim();
            if !is_month_label(label) || roll.get(label).is_some() {
                continue;
            }
            roll.columns.push(col);
            roll.entries.push(RollForwardEntry {
                month: label.to_string(),
                begin: count(ROLL_BEGIN_ROW, col),
                add: count(ROLL_ADD_ROW, col),
                less: count(ROLL_LESS_ROW, col),
                end: count(ROLL_END_ROW, col),
            });
        }
        roll
    }

    pub fn to_sheet(&self) -> RawSheet {
        RawSheet::new(self.grid.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleUpdate {
    pub active: Vec<String>,
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
    pub roll_forward: RollForwardEntry,
}

/// The four cumulative lifecycle tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberLifecycle {
    pub snapshot: MonthlyLog,
    pub additions: MonthlyLog,
    pub deletions: MonthlyLog,
    pub roll_forward: RollForward,
}

impl Default for SubscriberLifecycle {
    fn default() -> Self {
        Self {
            snapshot: MonthlyLog::new(LogLayout::Snapshot),
            additions: MonthlyLog::new(LogLayout::Offset),
            deletions: MonthlyLog::new(LogLayout::Offset),
            roll_forward: RollForward::default(),
        }
    }
}

impl SubscriberLifecycle {
    /// Absent sheets start empty.
    pub fn from_workbook(workbook: &Workbook, config: &PipelineConfig) -> Self {
        let sheets = &config.sheets;
        let load = |name: &str, layout: LogLayout| {
            workbook
                .sheet(name)
                .map(|sheet| MonthlyLog::from_sheet(sheet, layout))
                .unwrap_or_else(|| MonthlyLog::new(layout))
        };
        Self {
            snapshot: load(&sheets.active_subscribers, LogLayout::Snapshot),
            additions: load(&sheets.additions, LogLayout::Offset),
            deletions: load(&sheets.deletions, LogLayout::Offset),
            roll_forward: workbook
                .sheet(&sheets.churn)
                .map(RollForward::from_sheet)
                .unwrap_or_default(),
        }
    }

    pub fn write_to(&self, workbook: &mut Workbook, config: &PipelineConfig) {
        let sheets = &config.sheets;
        workbook.insert(sheets.active_subscribers.clone(), self.snapshot.to_sheet());
        workbook.insert(sheets.additions.clone(), self.additions.to_sheet());
        workbook.insert(sheets.deletions.clone(), self.deletions.to_sheet());
        workbook.insert(sheets.churn.clone(), self.roll_forward.to_sheet());
    }

    /// Records `month` with its active subscribers. Additions and deletions
    /// compare against the month column to its left, which is the previous
    /// calendar month only when months are processed in order.
    pub fn record_month(&mut self, month: &ReportingMonth, active: Vec<String>) -> LifecycleUpdate {
        let label = month.label();
        self.snapshot.upsert(&label, active.clone());

        let (additions, deletions) = match self.snapshot.preceding(&label) {
            None => (active.clone(), Vec::new()),
            Some(previous) => {
                let current: HashSet<&str> = active.iter().map(String::as_str).collect();
                let before: HashSet<&str> = previous.names.iter().map(String::as_str).collect();
                let additions = active
                    .iter()
                    .filter(|n| !before.contains(n.as_str()))
                    .cloned()
                    .collect();
                let deletions = previous
                    .names
                    .iter()
                    .filter(|n| !current.contains(n.as_str()))
                    .cloned()
                    .collect();
                (additions, deletions)
            }
        };

        self.additions.upsert(&label, additions.clone());
        self.deletions.upsert(&label, deletions.clone());

        let roll_forward = self.roll_forward.record(
            month,
            additions.len() as i64,
            deletions.len() as i64,
            active.len() as i64,
        );
        if !roll_forward.is_balanced() {
            warn!(
                "Roll-forward for {} does not balance (begin {} + add {} - less {} != end {}); were months processed out of order?",
                label, roll_forward.begin, roll_forward.add, roll_forward.less, roll_forward.end
            );
        }

        info!(
            "Subscribers for {}: {} active, {} added, {} churned",
            label,
            active.len(),
            additions.len(),
            deletions.len()
        );

        LifecycleUpdate {
            active,
            additions,
            deletions,
            roll_forward,
        }
    }
}

/// Distinct customer names with a positive day-wise value for `month`, in
/// ledger order.
pub fn active_customers(
    ledger: &AccrualLedger,
    month: &ReportingMonth,
    config: &PipelineConfig,
) -> Result<Vec<String>> {
    let table = ledger.table();
    let customer_col = table.require_column(&config.columns.customer_name)?;
    let Some(value_col) = ledger.metric_column(month, MetricKind::DayWise) else {
        warn!("No day-wise column for {}; no subscribers are active", month);
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut active = Vec::new();
    for row in 0..table.row_count() {
        if table.get(row, value_col).amount().or(0.0) <= 0.0 {
            continue;
        }
        let name = table.get(row, customer_col).trimmed();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.clone()) {
            active.push(name);
        }
    }

    debug!("{} distinct active customers for {}", active.len(), month);
    Ok(active)
}
