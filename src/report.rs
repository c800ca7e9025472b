use crate::error::Result;
use crate::ledger::AccrualLedger;
use crate::pivot::cycle_label;
use crate::schema::{InvoiceRow, MetricKind, Nature, PipelineConfig};
use crate::table::{Cell, Table};
use crate::utils::ReportingMonth;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

pub const PARTICULARS: &str = "Particulars";
pub const TOTAL_B2B: &str = "Total monthly revenue from B2B subscribers excluding GST (A)";
pub const TOTAL_B2C: &str = "Total monthly revenue from B2C subscribers (B)";
pub const TOTAL_REVENUE: &str = "Total monthly revenue from B2B and B2C C=A+B";
pub const MRR_B2B: &str = "Monthly Recurring revenue (excluding one time and others)-B2B";
pub const ACTIVE_B2B: &str = "No. of active subscribers-B2B";
pub const ARPU: &str = "Monthly recurring revenue per subscriber";
pub const ARR_B2B: &str = "Total Annual Recurring revenue (excluding one time and others)-B2B";

/// Minimum monthly value for a recurring B2B row to count as an active
/// subscriber in the report.
const ACTIVE_VALUE_FLOOR: f64 = 1.0;

/// Invoice number to declared nature, from the invoice register.
#[derive(Debug, Clone, Default)]
pub struct NatureClassifier {
    declared: HashMap<String, String>,
}

impl NatureClassifier {
    pub fn new(invoices: &[InvoiceRow]) -> Self {
        let declared = invoices
            .iter()
            .filter_map(|row| {
                row.nature
                    .as_ref()
                    .map(|nature| (row.invoice_number.clone(), nature.clone()))
            })
            .collect();
        Self { declared }
    }

    /// The first key of `invoice_field` with a declared nature wins. Otherwise
    /// a customer name mentioning B2C is B2C and everything else is B2B.
    pub fn classify(&self, invoice_field: &str, customer_name: &str) -> String {
        let declared = invoice_field
            .split([',', '/', '\n'])
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .find_map(|key| self.declared.get(key));
        if let Some(nature) = declared {
            return nature.clone();
        }

        if customer_name.to_uppercase().contains("B2C") {
            Nature::B2C.to_string()
        } else {
            Nature::B2B.to_string()
        }
    }
}

fn parse_nature(label: &str) -> Option<Nature> {
    let label = label.trim();
    if label.eq_ignore_ascii_case(Nature::B2B.as_str()) {
        Some(Nature::B2B)
    } else if label.eq_ignore_ascii_case(Nature::B2C.as_str()) {
        Some(Nature::B2C)
    } else {
        None
    }
}

/// Writes the Nature column for every ledger row.
pub fn assign_nature(
    ledger: &mut AccrualLedger,
    classifier: &NatureClassifier,
    config: &PipelineConfig,
) -> Result<()> {
    let columns = &config.columns;
    let invoice_col = ledger.table().require_column(&columns.invoice)?;
    let customer_col = ledger.table().column_index(&columns.customer_name);
    let table = ledger.table_mut();
    let nature_col = table.ensure_column(&columns.nature);

    for row in 0..table.row_count() {
        let invoice = table.get(row, invoice_col).trimmed();
        let customer = customer_col
            .map(|col| table.get(row, col).trimmed())
            .unwrap_or_default();
        let nature = classifier.classify(&invoice, &customer);
        table.set(row, nature_col, nature);
    }
    Ok(())
}

pub fn is_recurring(cycle: &Cell, config: &PipelineConfig) -> bool {
    let cycle = cycle.to_string().to_lowercase();
    !config
        .one_time_cycle_keywords
        .iter()
        .any(|keyword| cycle.contains(&keyword.to_lowercase()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub particulars: String,
    /// `None` for the blank separator lines.
    pub values: Option<Vec<f64>>,
}

impl ReportLine {
    fn with_values(particulars: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            particulars: particulars.into(),
            values: Some(values),
        }
    }

    fn blank() -> Self {
        Self {
            particulars: String::new(),
            values: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueReport {
    pub metric: MetricKind,
    pub months: Vec<ReportingMonth>,
    pub lines: Vec<ReportLine>,
}

impl RevenueReport {
    pub fn line(&self, particulars: &str) -> Option<&ReportLine> {
        self.lines.iter().find(|l| l.particulars == particulars)
    }

    pub fn value(&self, particulars: &str, month: &ReportingMonth) -> Option<f64> {
        let idx = self.months.iter().position(|m| m == month)?;
        self.line(particulars)?.values.as_ref().map(|v| v[idx])
    }

    pub fn to_table(&self, name: &str) -> Table {
        let mut columns = vec![PARTICULARS.to_string()];
        columns.extend(self.months.iter().map(|m| m.label()));

        let mut table = Table::new(name, columns);
        for line in &self.lines {
            let mut cells = vec![Cell::text(line.particulars.clone())];
            match &line.values {
                Some(values) => cells.extend(values.iter().map(|v| Cell::Number(*v))),
                None => cells.extend(self.months.iter().map(|_| Cell::Empty)),
            }
            table.push_row(cells);
        }
        table
    }
}

/// Builds one revenue report over `months`. Months without a ledger column for
/// `metric` report zero. The recurring block (MRR, active subscribers, ARPU,
/// ARR) is only included when `include_recurring` is set.
pub fn build_report(
    ledger: &AccrualLedger,
    months: &[ReportingMonth],
    metric: MetricKind,
    include_recurring: bool,
    config: &PipelineConfig,
) -> Result<RevenueReport> {
    let table = ledger.table();
    let columns = &config.columns;
    let nature_col = table.require_column(&columns.nature)?;
    let cycle_col = table.require_column(&columns.payment_cycle)?;

    let value_cols: Vec<Option<usize>> = months
        .iter()
        .map(|m| {
            let col = ledger.metric_column(m, metric);
            if col.is_none() {
                debug!("No {:?} column for {}; reporting zero", metric, m);
            }
            col
        })
        .collect();

    let width = months.len();
    let mut b2b_by_cycle: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut total_b2c = vec![0.0; width];
    let mut mrr = vec![0.0; width];
    let mut active = vec![0.0; width];
    let mut unclassified = 0;

    for row in 0..table.row_count() {
        let values: Vec<f64> = value_cols
            .iter()
            .map(|col| col.map(|c| table.get(row, c).amount().or(0.0)).unwrap_or(0.0))
            .collect();

        match parse_nature(&table.get(row, nature_col).trimmed()) {
            Some(Nature::B2C) => add_into(&mut total_b2c, &values),
            Some(Nature::B2B) => {
                let cycle = table.get(row, cycle_col);
                let sums = b2b_by_cycle
                    .entry(cycle_label(cycle))
                    .or_insert_with(|| vec![0.0; width]);
                add_into(sums, &values);

                if is_recurring(cycle, config) {
                    add_into(&mut mrr, &values);
                    for (count, value) in active.iter_mut().zip(&values) {
                        if *value > ACTIVE_VALUE_FLOOR {
                            *count += 1.0;
                        }
                    }
                }
            }
            None => unclassified += 1,
        }
    }

    if unclassified > 0 {
        warn!(
            "{} ledger rows have a nature other than B2B or B2C and are left out of the {:?} report",
            unclassified, metric
        );
    }

    let mut total_b2b = vec![0.0; width];
    for sums in b2b_by_cycle.values() {
        add_into(&mut total_b2b, sums);
    }
    let total_revenue: Vec<f64> = total_b2b.iter().zip(&total_b2c).map(|(a, b)| a + b).collect();

    let mut lines = vec![ReportLine::with_values(TOTAL_B2B, total_b2b)];
    lines.extend(
        b2b_by_cycle
            .into_iter()
            .map(|(cycle, values)| ReportLine::with_values(cycle, values)),
    );
    lines.push(ReportLine::blank());
    lines.push(ReportLine::with_values(TOTAL_B2C, total_b2c));
    lines.push(ReportLine::with_values(TOTAL_REVENUE, total_revenue));
    lines.push(ReportLine::blank());

    if include_recurring {
        let arpu = mrr
            .iter()
            .zip(&active)
            .map(|(m, n)| m / if *n == 0.0 { 1.0 } else { *n })
            .collect();
        let arr = mrr.iter().map(|m| m * 12.0).collect();

        lines.push(ReportLine::with_values(MRR_B2B, mrr));
        lines.push(ReportLine::with_values(ACTIVE_B2B, active));
        lines.push(ReportLine::with_values(ARPU, arpu));
        lines.push(ReportLine::with_values(ARR_B2B, arr));
    }

    Ok(RevenueReport {
        metric,
        months: months.to_vec(),
        lines,
    })
}

fn add_into(sums: &mut [f64], values: &[f64]) {
    for (sum, value) in sums.iter_mut().zip(values) {
        *sum += value;
    }
}

/// Classifies the ledger and produces the month-wise (MR-AR) and day-wise
/// (MR Accrual) reports for the fiscal year to date.
pub fn generate_reports(
    ledger: &mut AccrualLedger,
    invoices: &[InvoiceRow],
    target: &ReportingMonth,
    config: &PipelineConfig,
) -> Result<(RevenueReport, RevenueReport)> {
    let classifier = NatureClassifier::new(invoices);
    assign_nature(ledger, &classifier, config)?;

    let months = target.fiscal_year_to_date(config.fiscal_year_start_month);
    let month_wise = build_report(ledger, &months, MetricKind::MonthWise, true, config)?;
    let day_wise = build_report(ledger, &months, MetricKind::DayWise, false, config)?;

    info!(
        "Revenue reports built for {} months ending {}",
        months.len(),
        target
    );
    Ok((month_wise, day_wise))
}
