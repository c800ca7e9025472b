use crate::error::Result;
use crate::normalizer::{split_keys, InvoiceKeyNormalizer};
use crate::schema::{ColumnPattern, MatchedContract, MetricKind, PipelineConfig};
use crate::store::Workbook;
use crate::table::{Cell, RawSheet, Table};
use crate::utils::{inclusive_days, ReportingMonth};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Name the pipeline gives a derived column when it creates it.
pub fn derived_column_name(month: &ReportingMonth, metric: MetricKind) -> String {
    let abbr = month.abbreviation();
    match metric {
        MetricKind::DaysInMonth => format!("Days in {}", abbr),
        MetricKind::MonthWise => format!("{} Sales in months", abbr),
        MetricKind::DayWise => format!("{} Sales in days", abbr),
    }
}

/// First column (in table order) whose lowercased header mentions the month
/// by full or abbreviated name, contains one of the pattern keywords, and
/// none of its exclusions.
pub fn find_month_column(
    table: &Table,
    month: &ReportingMonth,
    pattern: &ColumnPattern,
) -> Option<String> {
    let names = [month.full_name().to_lowercase(), month.abbreviation().to_lowercase()];

    table
        .columns()
        .iter()
        .find(|column| {
            let header = column.to_lowercase();
            names.iter().any(|n| header.contains(n.as_str()))
                && pattern
                    .keywords
                    .iter()
                    .any(|k| header.contains(&k.to_lowercase()))
                && !pattern
                    .exclusions
                    .iter()
                    .any(|e| header.contains(&e.to_lowercase()))
        })
        .cloned()
}

/// Maps `(month, metric)` to the ledger column holding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnRegistry {
    entries: BTreeMap<(ReportingMonth, MetricKind), String>,
}

impl ColumnRegistry {
    pub fn register(&mut self, month: ReportingMonth, metric: MetricKind, column: &str) {
        self.entries.insert((month, metric), column.trim().to_string());
    }

    pub fn lookup(&self, month: &ReportingMonth, metric: MetricKind) -> Option<&str> {
        self.entries.get(&(*month, metric)).map(String::as_str)
    }

    /// Fills in month-wise and day-wise entries for `months` that nobody
    /// registered, using the header keyword rules. Registered entries win.
    pub fn discover(&mut self, table: &Table, months: &[ReportingMonth], config: &PipelineConfig) {
        for month in months {
            for metric in [MetricKind::MonthWise, MetricKind::DayWise] {
                if self.lookup(month, metric).is_some() {
                    continue;
                }
                let Some(pattern) = config.pattern_for(metric) else {
                    continue;
                };
                if let Some(column) = find_month_column(table, month, pattern) {
                    debug!("Discovered {:?} column for {}: '{}'", metric, month, column);
                    self.register(*month, metric, &column);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The running contract-level ledger. Every row carries one or more invoice
/// keys; the key set only ever grows.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualLedger {
    table: Table,
    registry: ColumnRegistry,
}

impl AccrualLedger {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            registry: ColumnRegistry::default(),
        }
    }

    pub fn from_workbook(workbook: &Workbook, config: &PipelineConfig) -> Result<Self> {
        let name = &config.sheets.ledger;
        let table = Table::from_raw(
            name.as_str(),
            workbook.require_sheet(name)?,
            config.header_rows.ledger,
        );
        table.require_column(&config.columns.invoice)?;
        debug!("Ledger '{}' loaded with {} rows", name, table.row_count());
        Ok(Self::new(table))
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ColumnRegistry {
        &mut self.registry
    }

    /// Column for `(month, metric)` as an index into the table.
    pub fn metric_column(&self, month: &ReportingMonth, metric: MetricKind) -> Option<usize> {
        self.registry
            .lookup(month, metric)
            .and_then(|name| self.table.column_index(name))
    }

    pub fn invoice_keys(&self, config: &PipelineConfig) -> BTreeSet<String> {
        let Some(col) = self.table.column_index(&config.columns.invoice) else {
            return BTreeSet::new();
        };
        self.table
            .column_cells(col)
            .flat_map(|cell| {
                let joined = cell.to_string();
                split_keys(&joined).map(str::to_string).collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn to_raw(&self) -> RawSheet {
        self.table.to_raw()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    pub appended: usize,
    pub already_present: usize,
}

pub struct LedgerAppender<'a> {
    config: &'a PipelineConfig,
    normalizer: InvoiceKeyNormalizer,
}

impl<'a> LedgerAppender<'a> {
    pub fn new(config: &'a PipelineConfig) -> Result<Self> {
        Ok(Self {
            config,
            normalizer: InvoiceKeyNormalizer::new(&config.default_fiscal_year)?,
        })
    }

    /// Appends matched contracts whose invoice key is not yet in the ledger,
    /// stamps them with `month`, and resets the month's derived columns to
    /// blank placeholders.
    pub fn append(
        &self,
        ledger: &mut AccrualLedger,
        month: &ReportingMonth,
        matched: &[MatchedContract],
    ) -> Result<AppendOutcome> {
        let columns = &self.config.columns;
        self.normalizer
            .normalize_column(ledger.table_mut(), &columns.invoice);

        let mut known = ledger.invoice_keys(self.config);
        let mut outcome = AppendOutcome::default();

        let table = ledger.table_mut();
        let invoice_col = table.require_column(&columns.invoice)?;
        let customer_col = table.ensure_column(&columns.customer_name);
        let start_col = table.ensure_column(&columns.start_date);
        let end_col = table.ensure_column(&columns.end_date);
        let cycle_col = table.ensure_column(&columns.payment_cycle);
        let amount_col = table.ensure_column(&columns.contract_amount);
        let months_col = table.ensure_column(&columns.months);
        let period_col = table.ensure_column(&columns.contract_period);

        for contract in matched {
            let key = contract.invoice_number.trim();
            if key.is_empty() || !known.insert(key.to_string()) {
                outcome.already_present += 1;
                continue;
            }

            let row = table.row_count();
            table.ensure_row_count(row + 1);
            table.set(row, invoice_col, Cell::text(key));
            table.set(row, customer_col, Cell::text(contract.customer_name.clone()));
            table.set(row, start_col, contract.start_date.clone());
            table.set(row, end_col, contract.end_date.clone());
            table.set(row, cycle_col, contract.payment_cycle.clone());
            table.set(row, amount_col, contract.contract_amount.clone());
            table.set(row, months_col, Cell::text(month.label()));
            outcome.appended += 1;
        }

        for row in 0..table.row_count() {
            if !table.get(row, period_col).is_blank() {
                continue;
            }
            let start = table.get(row, start_col).date().ok();
            let end = table.get(row, end_col).date().ok();
            if let (Some(start), Some(end)) = (start, end) {
                table.set(row, period_col, inclusive_days(start, end) as f64);
            }
        }

        for metric in [MetricKind::DaysInMonth, MetricKind::MonthWise, MetricKind::DayWise] {
            let name = derived_column_name(month, metric);
            let col = ledger.table_mut().ensure_column(&name);
            ledger.table_mut().fill_column(col, Cell::Empty);
            ledger.registry_mut().register(*month, metric, &name);
        }

        info!(
            "Ledger append for {}: {} new contracts, {} already present",
            month, outcome.appended, outcome.already_present
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(label: &str) -> ReportingMonth {
        ReportingMonth::parse(label).unwrap()
    }

    fn empty_ledger() -> AccrualLedger {
        let mut table = Table::new(
            "FY 25-26-Accrual",
            vec![
                "Customer Name".into(),
                "Invoice".into(),
                "Start Date ".into(),
                "End Date".into(),
                "Payment Cycle ".into(),
                " Contract Amount ".into(),
                "Contract period".into(),
                "Months".into(),
            ],
        );
        table.set_metadata_rows(vec![vec![Cell::text("Accrual ledger")]]);
        table.push_row(vec![
            Cell::text("Acme"),
            Cell::text("INV-25-26-1/2"),
            Cell::text("01/04/2025"),
            Cell::text("31/03/2026"),
            Cell::text("Yearly"),
            Cell::text("120000"),
            Cell::text("365"),
            Cell::text("Apr-25"),
        ]);
        AccrualLedger::new(table)
    }

    fn matched(key: &str, customer: &str) -> MatchedContract {
        MatchedContract {
            invoice_number: key.to_string(),
            customer_name: customer.to_string(),
            nature_of_service: Cell::Empty,
            start_date: Cell::text("15/09/2025"),
            end_date: Cell::text("14/11/2025"),
            payment_cycle: Cell::text("Quarterly"),
            contract_amount: Cell::text("9000"),
        }
    }

    #[test]
    fn test_append_skips_known_keys_and_stamps_month() {
        let config = PipelineConfig::default();
        let appender = LedgerAppender::new(&config).unwrap();
        let mut ledger = empty_ledger();

        let batch = vec![
            matched("INV-25-26-000002", "Acme"),
            matched("INV-25-26-000010", "Globex"),
        ];
        let outcome = appender.append(&mut ledger, &month("Oct-25"), &batch).unwrap();

        assert_eq!(outcome.appended, 1);
        assert_eq!(outcome.already_present, 1);

        let table = ledger.table();
        assert_eq!(table.row_count(), 2);
        let months_col = table.column_index("Months").unwrap();
        assert_eq!(table.get(1, months_col), &Cell::text("Oct-25"));

        let period_col = table.column_index("Contract period").unwrap();
        assert_eq!(table.get(1, period_col), &Cell::Number(61.0));
        assert_eq!(table.get(0, period_col), &Cell::text("365"));

        let invoice_col = table.column_index("Invoice").unwrap();
        assert_eq!(
            table.get(0, invoice_col),
            &Cell::text("INV-25-26-000001, INV-25-26-000002")
        );
    }

    #[test]
    fn test_append_is_idempotent_per_invoice_key() {
        let config = PipelineConfig::default();
        let appender = LedgerAppender::new(&config).unwrap();
        let mut ledger = empty_ledger();
        let batch = vec![
            matched("INV-25-26-000010", "Globex"),
            matched("INV-25-26-000010", "Globex"),
        ];

        appender.append(&mut ledger, &month("Oct-25"), &batch).unwrap();
        let keys_after_first = ledger.invoice_keys(&config);
        let rows_after_first = ledger.table().row_count();

        let outcome = appender.append(&mut ledger, &month("Oct-25"), &batch).unwrap();
        assert_eq!(outcome.appended, 0);
        assert_eq!(ledger.invoice_keys(&config), keys_after_first);
        assert_eq!(ledger.table().row_count(), rows_after_first);
        assert_eq!(rows_after_first, 2);
    }

    #[test]
    fn test_append_registers_blank_derived_columns() {
        let config = PipelineConfig::default();
        let appender = LedgerAppender::new(&config).unwrap();
        let mut ledger = empty_ledger();
        let oct = month("Oct-25");

        appender.append(&mut ledger, &oct, &[]).unwrap();

        for (metric, name) in [
            (MetricKind::DaysInMonth, "Days in Oct"),
            (MetricKind::MonthWise, "Oct Sales in months"),
            (MetricKind::DayWise, "Oct Sales in days"),
        ] {
            assert_eq!(ledger.registry().lookup(&oct, metric), Some(name));
            let col = ledger.metric_column(&oct, metric).unwrap();
            assert!(ledger.table().get(0, col).is_blank());
        }
    }

    #[test]
    fn test_find_month_column_keeps_metrics_apart() {
        let table = Table::new(
            "ledger",
            vec![
                "Invoiced amount for April".into(),
                "April Sales (Days Wise)".into(),
                " Invoiced amount for MAY ".into(),
                "May Sales (Days Wise)".into(),
                "June in months".into(),
                "June in days".into(),
                "Sept Sales in months".into(),
                " Sept Sales in days ".into(),
            ],
        );
        let month_wise = ColumnPattern::month_wise();
        let day_wise = ColumnPattern::day_wise();

        let find = |label: &str, pattern: &ColumnPattern| {
            find_month_column(&table, &month(label), pattern)
        };

        assert_eq!(find("Apr-25", &month_wise).as_deref(), Some("Invoiced amount for April"));
        assert_eq!(find("Apr-25", &day_wise).as_deref(), Some("April Sales (Days Wise)"));
        assert_eq!(find("May-25", &month_wise).as_deref(), Some(" Invoiced amount for MAY "));
        assert_eq!(find("Jun-25", &day_wise).as_deref(), Some("June in days"));
        assert_eq!(find("Sep-25", &month_wise).as_deref(), Some("Sept Sales in months"));
        assert_eq!(find("Sep-25", &day_wise).as_deref(), Some(" Sept Sales in days "));
        assert_eq!(find("Jul-25", &month_wise), None);
    }

    #[test]
    fn test_first_matching_column_wins_when_headers_overlap() {
        let config = PipelineConfig::default();
        let sep = month("Sep-25");
        let month_wise = ColumnPattern::month_wise();

        let legacy_first = Table::new(
            "ledger",
            vec!["Sept Sales in months".into(), "Sep Sales in months".into()],
        );
        assert_eq!(
            find_month_column(&legacy_first, &sep, &month_wise).as_deref(),
            Some("Sept Sales in months")
        );
        let mut registry = ColumnRegistry::default();
        registry.discover(&legacy_first, &[sep], &config);
        assert_eq!(registry.lookup(&sep, MetricKind::MonthWise), Some("Sept Sales in months"));

        let canonical_first = Table::new(
            "ledger",
            vec!["Sep Sales in months".into(), "Sept Sales in months".into()],
        );
        assert_eq!(
            find_month_column(&canonical_first, &sep, &month_wise).as_deref(),
            Some("Sep Sales in months")
        );
    }

    #[test]
    fn test_registered_columns_win_over_discovery() {
        let config = PipelineConfig::default();
        let table = Table::new(
            "ledger",
            vec!["Oct Sales in days".into(), "October in days (revised)".into()],
        );
        let oct = month("Oct-25");
        let mut registry = ColumnRegistry::default();
        registry.register(oct, MetricKind::DayWise, "October in days (revised)");
        registry.discover(&table, &[oct], &config);

        assert_eq!(
            registry.lookup(&oct, MetricKind::DayWise),
            Some("October in days (revised)")
        );
        assert_eq!(registry.lookup(&oct, MetricKind::MonthWise), None);
    }
}
