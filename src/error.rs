use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevenueError {
    #[error("Invalid target month '{0}': expected Mon-YY (e.g. Oct-25)")]
    InvalidTargetMonth(String),

    #[error("Invalid fiscal year tag '{0}': expected YY-YY (e.g. 25-26)")]
    InvalidFiscalYearTag(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required table '{0}' is missing from the workbook")]
    MissingTable(String),

    #[error("Required column '{column}' is missing from table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("Workbook changed since it was loaded: expected version {expected}, store is at {found}")]
    StaleWorkbook { expected: u64, found: u64 },

    #[error("Pivot '{pivot}' totals do not add up for '{label}': expected {expected}, found {found}")]
    PivotTotalsMismatch {
        pivot: String,
        label: String,
        expected: f64,
        found: f64,
    },

    #[error("Roll-forward violation in {month}: begin ({begin}) + add ({add}) - less ({less}) != end ({end})")]
    RollForwardViolation {
        month: String,
        begin: i64,
        add: i64,
        less: i64,
        end: i64,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RevenueError>;
