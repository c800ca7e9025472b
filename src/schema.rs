use crate::error::{Result, RevenueError};
use crate::table::Cell;
use crate::utils::validate_fiscal_year_tag;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
pub enum Nature {
    #[serde(rename = "B2B")]
    #[schemars(description = "Business customer. Counted towards MRR, ARPU and ARR.")]
    B2B,

    #[serde(rename = "B2C")]
    #[schemars(description = "Consumer customer. Reported as a revenue total only.")]
    B2C,
}

impl Nature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Nature::B2B => "B2B",
            Nature::B2C => "B2C",
        }
    }
}

impl fmt::Display for Nature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three per-month values the proration engine derives for each contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// `Days in <Mon>`
    DaysInMonth,
    /// `<Mon> Sales in months`
    MonthWise,
    /// `<Mon> Sales in days`
    DayWise,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct SheetNames {
    #[schemars(description = "Master contract sheet holding contract terms per customer.")]
    pub master: String,
    #[schemars(description = "Invoice register sheet (invoice number, customer, nature).")]
    pub invoices: String,
    #[schemars(description = "Running accrual ledger sheet that grows every month.")]
    pub ledger: String,
    pub active_subscribers: String,
    pub additions: String,
    pub deletions: String,
    pub churn: String,
    pub pivot_month_wise: String,
    pub pivot_day_wise: String,
    #[schemars(description = "Revenue report built from month-wise values.")]
    pub report_month_wise: String,
    #[schemars(description = "Revenue report built from day-wise values.")]
    pub report_day_wise: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            master: "FY 25-26".to_string(),
            invoices: "Invoice (2)".to_string(),
            ledger: "FY 25-26-Accrual".to_string(),
            active_subscribers: "Active Subscriber".to_string(),
            additions: "Addition".to_string(),
            deletions: "Deletions".to_string(),
            churn: "Customer churnout".to_string(),
            pivot_month_wise: "Pivot Month Wise".to_string(),
            pivot_day_wise: "Pivot Day Wise".to_string(),
            report_month_wise: "MR-AR".to_string(),
            report_day_wise: "MR Accrual".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct HeaderRows {
    #[schemars(description = "0-based row of the raw master sheet that holds the column headers.")]
    pub master: usize,
    pub invoices: usize,
    #[schemars(
        description = "0-based header row of the raw ledger sheet. Rows above it are metadata carried through every run."
    )]
    pub ledger: usize,
}

impl Default for HeaderRows {
    fn default() -> Self {
        Self {
            master: 2,
            invoices: 0,
            ledger: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ColumnNames {
    pub invoice: String,
    pub invoice_number: String,
    pub customer_name: String,
    pub nature: String,
    pub nature_of_service: String,
    pub start_date: String,
    pub end_date: String,
    pub payment_cycle: String,
    pub contract_amount: String,
    pub contract_period: String,
    #[schemars(description = "Ledger column stamped with the Mon-YY label of the run that appended the row.")]
    pub months: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            invoice: "Invoice".to_string(),
            invoice_number: "Invoice Number".to_string(),
            customer_name: "Customer Name".to_string(),
            nature: "Nature".to_string(),
            nature_of_service: "Nature of service".to_string(),
            start_date: "Start Date".to_string(),
            end_date: "End Date".to_string(),
            payment_cycle: "Payment Cycle".to_string(),
            contract_amount: "Contract Amount".to_string(),
            contract_period: "Contract period".to_string(),
            months: "Months".to_string(),
        }
    }
}

/// Keyword rule used to recognise a per-month column by its header text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ColumnPattern {
    #[schemars(description = "At least one keyword must appear in the lowercased header.")]
    pub keywords: Vec<String>,
    #[schemars(description = "No exclusion keyword may appear in the lowercased header.")]
    pub exclusions: Vec<String>,
}

impl ColumnPattern {
    pub fn month_wise() -> Self {
        Self {
            keywords: vec!["invoiced amount".to_string(), "in months".to_string()],
            exclusions: vec!["days".to_string(), "wise".to_string()],
        }
    }

    pub fn day_wise() -> Self {
        Self {
            keywords: vec![
                "days wise".to_string(),
                "in days".to_string(),
                "sales in days".to_string(),
            ],
            exclusions: vec!["months".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct PipelineConfig {
    #[schemars(
        description = "Fiscal year tag (YY-YY) given to bare invoice numbers that appear before any fully qualified key."
    )]
    pub default_fiscal_year: String,

    #[schemars(description = "Calendar month (1-12) the fiscal year starts in. Pivots and reports cover this month through the target month.")]
    pub fiscal_year_start_month: u32,

    #[serde(default)]
    pub sheets: SheetNames,

    #[serde(default)]
    pub header_rows: HeaderRows,

    #[serde(default)]
    pub columns: ColumnNames,

    #[serde(default = "ColumnPattern::month_wise")]
    pub month_wise_pattern: ColumnPattern,

    #[serde(default = "ColumnPattern::day_wise")]
    pub day_wise_pattern: ColumnPattern,

    #[schemars(
        description = "Payment cycle labels containing any of these (case-insensitive) are one-time or day-bound charges and excluded from MRR."
    )]
    #[serde(default = "default_one_time_keywords")]
    pub one_time_cycle_keywords: Vec<String>,
}

fn default_one_time_keywords() -> Vec<String> {
    ["one time", "days", "10-days", "12-days", "15-days", "19-days", "38 -days"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_fiscal_year: "25-26".to_string(),
            fiscal_year_start_month: 4,
            sheets: SheetNames::default(),
            header_rows: HeaderRows::default(),
            columns: ColumnNames::default(),
            month_wise_pattern: ColumnPattern::month_wise(),
            day_wise_pattern: ColumnPattern::day_wise(),
            one_time_cycle_keywords: default_one_time_keywords(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        validate_fiscal_year_tag(&self.default_fiscal_year)?;

        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(RevenueError::InvalidConfig(format!(
                "fiscal_year_start_month {} must be between 1 and 12",
                self.fiscal_year_start_month
            )));
        }

        for (name, pattern) in [
            ("month_wise_pattern", &self.month_wise_pattern),
            ("day_wise_pattern", &self.day_wise_pattern),
        ] {
            if pattern.keywords.is_empty() {
                return Err(RevenueError::InvalidConfig(format!(
                    "{} needs at least one keyword",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn pattern_for(&self, metric: MetricKind) -> Option<&ColumnPattern> {
        match metric {
            MetricKind::MonthWise => Some(&self.month_wise_pattern),
            MetricKind::DayWise => Some(&self.day_wise_pattern),
            MetricKind::DaysInMonth => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub invoice_number: String,
    pub customer_name: String,
    pub nature: Option<String>,
}

/// An invoice joined to the terms of the contract that lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedContract {
    pub invoice_number: String,
    pub customer_name: String,
    pub nature_of_service: Cell,
    pub start_date: Cell,
    pub end_date: Cell,
    pub payment_cycle: Cell,
    pub contract_amount: Cell,
}

/// Parsed view of one ledger row, as the proration engine needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractTerms {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sheets.ledger, "FY 25-26-Accrual");
        assert_eq!(config.fiscal_year_start_month, 4);
    }

    #[test]
    fn test_config_from_partial_json_uses_defaults() {
        let json = r#"{ "default_fiscal_year": "26-27", "fiscal_year_start_month": 4 }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.default_fiscal_year, "26-27");
        assert_eq!(config.columns.invoice, "Invoice");
        assert_eq!(config.day_wise_pattern, ColumnPattern::day_wise());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let json = r#"{ "default_fiscal_year": "2025", "fiscal_year_start_month": 4 }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(RevenueError::InvalidFiscalYearTag(_))
        ));

        let json = r#"{ "default_fiscal_year": "25-26", "fiscal_year_start_month": 13 }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(RevenueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = PipelineConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("default_fiscal_year"));
        assert!(schema_json.contains("one_time_cycle_keywords"));
    }

    #[test]
    fn test_nature_serialization() {
        assert_eq!(serde_json::to_string(&Nature::B2C).unwrap(), "\"B2C\"");
        let parsed: Nature = serde_json::from_str("\"B2B\"").unwrap();
        assert_eq!(parsed, Nature::B2B);
    }
}
