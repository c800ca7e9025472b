//! # Subscription Revenue Builder
//!
//! A library that turns a month's invoices and a contract master into
//! recognized subscription revenue: a cumulative accrual ledger, payment-cycle
//! pivots, subscriber churn tables and MRR/ARR reports.
//!
//! ## Core Concepts
//!
//! - **Invoice keys**: Canonical `INV-YY-YY-NNNNNN` identifiers. Free-text invoice cells are normalized before anything is matched
//! - **Accrual ledger**: One row per contract, keyed by invoice. It only grows, and re-running a month never duplicates a row
//! - **Proration**: Each contract is recognized per month both day-wise (daily rate) and month-wise (even split over whole months)
//! - **Lifecycle**: Active subscribers per month, with additions, deletions and a begin + add - less = end roll-forward
//! - **Reports**: B2B/B2C revenue by payment cycle plus MRR, active subscribers, ARPU and ARR
//!
//! ## Example
//!
//! ```rust,ignore
//! use subscription_revenue_builder::*;
//!
//! let config = PipelineConfig::default();
//! let mut store = CsvDirectoryStore::new("workbook/");
//!
//! let summary = process_month(&mut store, &config, "Oct-25").unwrap();
//! println!("{} new contracts, {} active subscribers", summary.appended, summary.active_subscribers);
//! ```

pub mod engine;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod lifecycle;
pub mod matcher;
pub mod normalizer;
pub mod pivot;
pub mod report;
pub mod schema;
pub mod store;
pub mod table;
pub mod utils;

pub use engine::{prorate, Proration, ProrationEngine, ProrationSummary};
pub use error::{Result, RevenueError};
pub use ingestion::*;
pub use ledger::{AccrualLedger, AppendOutcome, ColumnRegistry, LedgerAppender};
pub use lifecycle::{
    active_customers, LifecycleUpdate, LogLayout, MonthlyLog, RollForward, RollForwardEntry,
    SubscriberLifecycle,
};
pub use matcher::match_invoices;
pub use normalizer::InvoiceKeyNormalizer;
pub use pivot::{aggregate_pivots, PivotTable};
pub use report::{generate_reports, NatureClassifier, RevenueReport};
pub use schema::*;
pub use store::{CsvDirectoryStore, InMemoryStore, Workbook, WorkbookStore};
pub use table::{Cell, RawSheet, Table};
pub use utils::*;

use log::{debug, info};

/// Outcome of processing one reporting month.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub month: ReportingMonth,
    /// Store version after the commit.
    pub version: u64,
    pub matched: usize,
    pub appended: usize,
    pub already_present: usize,
    pub proration: ProrationSummary,
    pub active_subscribers: usize,
    pub additions: usize,
    pub deletions: usize,
    pub roll_forward: RollForwardEntry,
    pub pivot_months: usize,
    pub sheets_written: Vec<String>,
}

/// Everything one run produces before it is written back.
#[derive(Debug, Clone)]
pub struct MonthOutputs {
    pub month: ReportingMonth,
    /// Contract master with its invoice keys normalized.
    pub master: Table,
    pub matched: usize,
    pub append: AppendOutcome,
    pub proration: ProrationSummary,
    pub ledger: AccrualLedger,
    pub pivots: (PivotTable, PivotTable),
    pub lifecycle: SubscriberLifecycle,
    pub update: LifecycleUpdate,
    pub reports: (RevenueReport, RevenueReport),
}

pub struct RevenuePipeline<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RevenuePipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Loads the workbook, processes `month_label` and commits every output
    /// sheet in a single write. Nothing is written if any step fails.
    pub fn run<S: WorkbookStore>(&self, store: &mut S, month_label: &str) -> Result<RunSummary> {
        self.run_inner(store, month_label, None)
    }

    /// Like [`run`](Self::run), but refuses to commit when pivot totals or
    /// the subscriber roll-forward do not hold within `tolerance`.
    pub fn run_with_verification<S: WorkbookStore>(
        &self,
        store: &mut S,
        month_label: &str,
        tolerance: f64,
    ) -> Result<RunSummary> {
        self.run_inner(store, month_label, Some(tolerance))
    }

    fn run_inner<S: WorkbookStore>(
        &self,
        store: &mut S,
        month_label: &str,
        tolerance: Option<f64>,
    ) -> Result<RunSummary> {
        let month = ReportingMonth::parse(month_label)?;
        info!("Processing subscription revenue for {}", month);

        let mut workbook = store.load()?;
        debug!(
            "Workbook version {} with {} sheets",
            workbook.version(),
            workbook.sheets().len()
        );

        let outputs = self.process(&workbook, &month)?;

        if let Some(tolerance) = tolerance {
            outputs.pivots.0.verify_totals(tolerance)?;
            outputs.pivots.1.verify_totals(tolerance)?;
            outputs.lifecycle.roll_forward.verify()?;
        }

        let sheets_written = self.write_outputs(&mut workbook, &outputs);
        let version = store.commit(&workbook)?;
        info!("Committed {} at workbook version {}", month, version);

        Ok(RunSummary {
            month,
            version,
            matched: outputs.matched,
            appended: outputs.append.appended,
            already_present: outputs.append.already_present,
            proration: outputs.proration,
            active_subscribers: outputs.update.active.len(),
            additions: outputs.update.additions.len(),
            deletions: outputs.update.deletions.len(),
            roll_forward: outputs.update.roll_forward.clone(),
            pivot_months: outputs.pivots.1.months.len(),
            sheets_written,
        })
    }

    /// Runs every stage against an in-memory copy of `workbook`. Required
    /// sheets and columns are checked before any stage transforms data.
    pub fn process(&self, workbook: &Workbook, month: &ReportingMonth) -> Result<MonthOutputs> {
        let config = self.config;

        let mut master = load_master(workbook, config)?;
        let invoices = load_invoices(workbook, config)?;
        let register = invoice_rows(&invoices, config)?;
        let mut ledger = AccrualLedger::from_workbook(workbook, config)?;

        let normalizer = InvoiceKeyNormalizer::new(&config.default_fiscal_year)?;
        normalizer.normalize_column(&mut master, &config.columns.invoice);

        let matched = match_invoices(&invoices, &master, config)?;
        info!("{} invoices matched to contract terms", matched.len());

        let append = LedgerAppender::new(config)?.append(&mut ledger, month, &matched)?;
        let proration = ProrationEngine::new(config, *month).process(&mut ledger)?;
        let pivots = aggregate_pivots(&mut ledger, month, config)?;

        let mut lifecycle = SubscriberLifecycle::from_workbook(workbook, config);
        let active = active_customers(&ledger, month, config)?;
        let update = lifecycle.record_month(month, active);

        let reports = generate_reports(&mut ledger, &register, month, config)?;

        Ok(MonthOutputs {
            month: *month,
            master,
            matched: matched.len(),
            append,
            proration,
            ledger,
            pivots,
            lifecycle,
            update,
            reports,
        })
    }

    /// Writes every output sheet into `workbook` and returns their names.
    fn write_outputs(&self, workbook: &mut Workbook, outputs: &MonthOutputs) -> Vec<String> {
        let sheets = &self.config.sheets;
        let cycle_header = self.config.columns.payment_cycle.trim();

        workbook.insert(sheets.master.clone(), outputs.master.to_raw());
        workbook.insert(sheets.ledger.clone(), outputs.ledger.to_raw());
        workbook.insert(
            sheets.pivot_month_wise.clone(),
            outputs.pivots.0.to_table(&sheets.pivot_month_wise, cycle_header).to_raw(),
        );
        workbook.insert(
            sheets.pivot_day_wise.clone(),
            outputs.pivots.1.to_table(&sheets.pivot_day_wise, cycle_header).to_raw(),
        );
        outputs.lifecycle.write_to(workbook, self.config);
        workbook.insert(
            sheets.report_month_wise.clone(),
            outputs.reports.0.to_table(&sheets.report_month_wise).to_raw(),
        );
        workbook.insert(
            sheets.report_day_wise.clone(),
            outputs.reports.1.to_table(&sheets.report_day_wise).to_raw(),
        );

        vec![
            sheets.master.clone(),
            sheets.ledger.clone(),
            sheets.pivot_month_wise.clone(),
            sheets.pivot_day_wise.clone(),
            sheets.active_subscribers.clone(),
            sheets.additions.clone(),
            sheets.deletions.clone(),
            sheets.churn.clone(),
            sheets.report_month_wise.clone(),
            sheets.report_day_wise.clone(),
        ]
    }
}

pub fn process_month<S: WorkbookStore>(
    store: &mut S,
    config: &PipelineConfig,
    month_label: &str,
) -> Result<RunSummary> {
    RevenuePipeline::new(config)?.run(store, month_label)
}

pub fn process_month_with_verification<S: WorkbookStore>(
    store: &mut S,
    config: &PipelineConfig,
    month_label: &str,
    tolerance: f64,
) -> Result<RunSummary> {
    RevenuePipeline::new(config)?.run_with_verification(store, month_label, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sheet(rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn workbook() -> BTreeMap<String, RawSheet> {
        let mut sheets = BTreeMap::new();
        sheets.insert(
            "FY 25-26".to_string(),
            sheet(&[
                &["Contract master"],
                &[""],
                &["Customer Name", "Invoice", "Start Date ", "End Date", "Payment Cycle ", "Contract Amount"],
                &["Acme", "INV-25-26-000001", "01/04/2025", "31/03/2026", "Yearly", "1,20,000"],
                &["Globex", "INV-25-26-000003", "15/09/2025", "14/11/2025", "Quarterly", "9000"],
            ]),
        );
        sheets.insert(
            "Invoice (2)".to_string(),
            sheet(&[
                &["Invoice Number", "Customer Name", "Nature"],
                &["INV-25-26-000001", "Acme", "B2B"],
                &["INV-25-26-000003", "Globex", ""],
            ]),
        );
        sheets.insert(
            "FY 25-26-Accrual".to_string(),
            sheet(&[&["Accrual"], &[""], &["Invoice", "Customer Name"]]),
        );
        sheets
    }

    #[test]
    fn test_end_to_end_month() {
        let config = PipelineConfig::default();
        let mut store = InMemoryStore::new(workbook());

        let summary = process_month(&mut store, &config, "Oct-25").unwrap();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.appended, 2);
        assert_eq!(summary.proration.active_contracts, 2);
        assert_eq!(summary.active_subscribers, 2);
        assert_eq!(summary.roll_forward.end, 2);
        assert_eq!(summary.pivot_months, 1);

        assert_eq!(summary.sheets_written.len(), 10);
        let stored = store.load().unwrap();
        for name in &summary.sheets_written {
            assert!(stored.sheet(name).is_some(), "missing sheet {}", name);
        }
        assert!(stored.sheet("Invoice (2)").is_some());
    }

    #[test]
    fn test_verified_run_checks_outputs() {
        let config = PipelineConfig::default();
        let mut store = InMemoryStore::new(workbook());
        let summary = process_month_with_verification(&mut store, &config, "Oct-25", 0.01).unwrap();
        assert_eq!(summary.appended, 2);
    }

    #[test]
    fn test_invalid_month_writes_nothing() {
        let config = PipelineConfig::default();
        let mut store = InMemoryStore::new(workbook());

        let result = process_month(&mut store, &config, "October 2025");
        assert!(matches!(result, Err(RevenueError::InvalidTargetMonth(_))));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_missing_ledger_sheet_is_fatal() {
        let config = PipelineConfig::default();
        let mut sheets = workbook();
        sheets.remove("FY 25-26-Accrual");
        let mut store = InMemoryStore::new(sheets);

        let result = process_month(&mut store, &config, "Oct-25");
        assert!(matches!(result, Err(RevenueError::MissingTable(_))));
        assert_eq!(store.version(), 0);
        assert!(store.load().unwrap().sheet("MR-AR").is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            fiscal_year_start_month: 13,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            RevenuePipeline::new(&config),
            Err(RevenueError::InvalidConfig(_))
        ));
    }
}
