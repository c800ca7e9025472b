use crate::error::{Result, RevenueError};
use crate::ledger::AccrualLedger;
use crate::schema::{MetricKind, PipelineConfig};
use crate::table::{Cell, Table};
use crate::utils::ReportingMonth;
use log::{debug, info};
use std::collections::BTreeMap;

pub const GRAND_TOTAL: &str = "Grand Total";
pub const UNKNOWN_CYCLE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub label: String,
    pub values: Vec<f64>,
    pub total: f64,
}

impl PivotRow {
    fn new(label: String, values: Vec<f64>) -> Self {
        let total = values.iter().sum();
        Self { label, values, total }
    }
}

/// Prorated values summed by payment cycle, one column per month that has a
/// matching ledger column.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub metric: MetricKind,
    pub months: Vec<ReportingMonth>,
    pub rows: Vec<PivotRow>,
    pub grand_total: Option<PivotRow>,
}

impl PivotTable {
    pub fn value(&self, cycle: &str, month: &ReportingMonth) -> Option<f64> {
        let idx = self.months.iter().position(|m| m == month)?;
        self.rows
            .iter()
            .find(|r| r.label == cycle)
            .map(|r| r.values[idx])
    }

    /// Grand Total column equals each row's month sum; Grand Total row equals
    /// each column's sum.
    pub fn verify_totals(&self, tolerance: f64) -> Result<()> {
        let name = format!("{:?}", self.metric);
        let mismatch = |label: &str, expected: f64, found: f64| RevenueError::PivotTotalsMismatch {
            pivot: name.clone(),
            label: label.to_string(),
            expected,
            found,
        };

        for row in self.rows.iter().chain(self.grand_total.iter()) {
            let expected: f64 = row.values.iter().sum();
            if (expected - row.total).abs() > tolerance {
                return Err(mismatch(&row.label, expected, row.total));
            }
        }

        if let Some(grand) = &self.grand_total {
            for (idx, month) in self.months.iter().enumerate() {
                let expected: f64 = self.rows.iter().map(|r| r.values[idx]).sum();
                if (expected - grand.values[idx]).abs() > tolerance {
                    return Err(mismatch(&month.full_name(), expected, grand.values[idx]));
                }
            }
        }

        Ok(())
    }

    pub fn to_table(&self, name: &str, cycle_header: &str) -> Table {
        let mut columns = vec![cycle_header.to_string()];
        if self.months.is_empty() {
            return Table::new(name, columns);
        }
        columns.extend(self.months.iter().map(|m| m.full_name()));
        columns.push(GRAND_TOTAL.to_string());

        let mut table = Table::new(name, columns);
        for row in self.rows.iter().chain(self.grand_total.iter()) {
            let mut cells = vec![Cell::text(row.label.clone())];
            cells.extend(row.values.iter().map(|v| Cell::Number(*v)));
            cells.push(Cell::Number(row.total));
            table.push_row(cells);
        }
        table
    }
}

pub fn cycle_label(cell: &Cell) -> String {
    let label = cell.trimmed();
    if label.is_empty() || label.eq_ignore_ascii_case("nan") {
        UNKNOWN_CYCLE.to_string()
    } else {
        label
    }
}

/// Builds one pivot from registered ledger columns. Months without a column
/// contribute nothing.
pub fn build_pivot(
    ledger: &AccrualLedger,
    months: &[ReportingMonth],
    metric: MetricKind,
    config: &PipelineConfig,
) -> Result<PivotTable> {
    let table = ledger.table();
    let cycle_col = table.require_column(&config.columns.payment_cycle)?;

    let located: Vec<(ReportingMonth, usize)> = months
        .iter()
        .filter_map(|m| ledger.metric_column(m, metric).map(|col| (*m, col)))
        .collect();

    if located.is_empty() {
        debug!("No {:?} columns located; pivot is empty", metric);
        return Ok(PivotTable {
            metric,
            months: Vec::new(),
            rows: Vec::new(),
            grand_total: None,
        });
    }

    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in 0..table.row_count() {
        let sums = groups
            .entry(cycle_label(table.get(row, cycle_col)))
            .or_insert_with(|| vec![0.0; located.len()]);
        for (idx, (_, col)) in located.iter().enumerate() {
            sums[idx] += table.get(row, *col).amount().or(0.0);
        }
    }

    let rows: Vec<PivotRow> = groups
        .into_iter()
        .map(|(label, values)| PivotRow::new(label, values))
        .collect();

    let column_sums: Vec<f64> = (0..located.len())
        .map(|idx| rows.iter().map(|r| r.values[idx]).sum())
        .collect();

    Ok(PivotTable {
        metric,
        months: located.iter().map(|(m, _)| *m).collect(),
        rows,
        grand_total: Some(PivotRow::new(GRAND_TOTAL.to_string(), column_sums)),
    })
}

/// Discovers legacy month columns for the fiscal year to date, then builds
/// the month-wise and day-wise pivots.
pub fn aggregate_pivots(
    ledger: &mut AccrualLedger,
    target: &ReportingMonth,
    config: &PipelineConfig,
) -> Result<(PivotTable, PivotTable)> {
    let months = target.fiscal_year_to_date(config.fiscal_year_start_month);
    let snapshot = ledger.table().clone();
    ledger.registry_mut().discover(&snapshot, &months, config);

    let month_wise = build_pivot(ledger, &months, MetricKind::MonthWise, config)?;
    let day_wise = build_pivot(ledger, &months, MetricKind::DayWise, config)?;

    info!(
        "Pivots for {}: month-wise covers {} months, day-wise covers {} months, {} payment cycles",
        target,
        month_wise.months.len(),
        day_wise.months.len(),
        day_wise.rows.len()
    );
    Ok((month_wise, day_wise))
}
