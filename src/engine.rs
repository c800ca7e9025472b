use crate::error::Result;
use crate::ledger::{derived_column_name, AccrualLedger};
use crate::schema::{ContractTerms, MetricKind, PipelineConfig};
use crate::table::Cell;
use crate::utils::{inclusive_days, round_to_cents, whole_calendar_months, ReportingMonth};
use chrono::Days;
use log::{debug, info, warn};

/// Revenue recognized for one contract in one month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proration {
    pub days_in_month: i64,
    /// Straight daily proration of the contract amount.
    pub sales_in_days: f64,
    /// Contract amount spread evenly over its whole months. Zero in the
    /// closing month, which is recognized through the day-wise figure only.
    pub sales_in_months: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProrationSummary {
    pub active_contracts: usize,
    pub skipped_rows: usize,
    pub total_sales_in_days: f64,
    pub total_sales_in_months: f64,
}

/// Prorates `terms` into `month`. `None` when the contract does not overlap
/// the month at all.
pub fn prorate(terms: &ContractTerms, month: &ReportingMonth) -> Option<Proration> {
    let active_start = terms.start.max(month.first_day());
    let active_end = terms.end.min(month.last_day());
    if active_start > active_end {
        return None;
    }

    let days_in_month = inclusive_days(active_start, active_end);
    let total_contract_days = inclusive_days(terms.start, terms.end);

    let day_after_end = terms.end.checked_add_days(Days::new(1)).unwrap_or(terms.end);
    let total_contract_months = whole_calendar_months(terms.start, day_after_end).max(1);

    let sales_in_days = if total_contract_days > 0 {
        round_to_cents(terms.amount / total_contract_days as f64 * days_in_month as f64)
    } else {
        0.0
    };

    let sales_in_months = if month.contains(terms.end) {
        0.0
    } else {
        round_to_cents(terms.amount / total_contract_months as f64)
    };

    Some(Proration {
        days_in_month,
        sales_in_days,
        sales_in_months,
    })
}

pub struct ProrationEngine<'a> {
    config: &'a PipelineConfig,
    month: ReportingMonth,
}

impl<'a> ProrationEngine<'a> {
    pub fn new(config: &'a PipelineConfig, month: ReportingMonth) -> Self {
        Self { config, month }
    }

    /// Fills the month's three derived columns for every ledger row. Rows are
    /// first reset to zero; rows with unreadable dates keep that zero.
    pub fn process(&self, ledger: &mut AccrualLedger) -> Result<ProrationSummary> {
        let columns = &self.config.columns;
        let start_col = ledger.table().require_column(&columns.start_date)?;
        let end_col = ledger.table().require_column(&columns.end_date)?;
        let amount_col = ledger.table().require_column(&columns.contract_amount)?;

        let days_col = self.metric_column(ledger, MetricKind::DaysInMonth);
        let months_col = self.metric_column(ledger, MetricKind::MonthWise);
        let sales_col = self.metric_column(ledger, MetricKind::DayWise);

        let table = ledger.table_mut();
        table.fill_column(days_col, Cell::Number(0.0));
        table.fill_column(months_col, Cell::Number(0.0));
        table.fill_column(sales_col, Cell::Number(0.0));

        let mut summary = ProrationSummary::default();

        for row in 0..table.row_count() {
            let start = table.get(row, start_col).date().ok();
            let end = table.get(row, end_col).date().ok();
            let (Some(start), Some(end)) = (start, end) else {
                warn!(
                    "Skipping ledger row {} for {}: unreadable start/end date ('{}' / '{}')",
                    row,
                    self.month,
                    table.get(row, start_col),
                    table.get(row, end_col)
                );
                summary.skipped_rows += 1;
                continue;
            };

            let terms = ContractTerms {
                start,
                end,
                amount: table.get(row, amount_col).amount().or(0.0),
            };

            let Some(proration) = prorate(&terms, &self.month) else {
                continue;
            };

            table.set(row, days_col, proration.days_in_month as f64);
            table.set(row, months_col, proration.sales_in_months);
            table.set(row, sales_col, proration.sales_in_days);

            summary.active_contracts += 1;
            summary.total_sales_in_days += proration.sales_in_days;
            summary.total_sales_in_months += proration.sales_in_months;
        }

        info!(
            "Prorated {} active contracts for {} (day-wise {:.2}, month-wise {:.2}, {} skipped)",
            summary.active_contracts,
            self.month,
            summary.total_sales_in_days,
            summary.total_sales_in_months,
            summary.skipped_rows
        );
        Ok(summary)
    }

    fn metric_column(&self, ledger: &mut AccrualLedger, metric: MetricKind) -> usize {
        if let Some(col) = ledger.metric_column(&self.month, metric) {
            return col;
        }
        let name = derived_column_name(&self.month, metric);
        debug!("Creating missing {:?} column '{}'", metric, name);
        let col = ledger.table_mut().ensure_column(&name);
        ledger.registry_mut().register(self.month, metric, &name);
        col
    }
}
