use crate::error::{Result, RevenueError};
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a tolerant parse. `Defaulted` means the input was blank, a
/// placeholder, or unreadable; the caller decides what to substitute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Defaulted,
}

impl<T> ParseOutcome<T> {
    pub fn or(self, fallback: T) -> T {
        match self {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Defaulted => fallback,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::Defaulted => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }
}

/// A calendar month identified by its `Mon-YY` label (e.g. `Oct-25`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportingMonth {
    first_day: NaiveDate,
}

impl ReportingMonth {
    pub fn parse(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        let first_day = NaiveDate::parse_from_str(&format!("01-{}", trimmed), "%d-%b-%y")
            .map_err(|_| RevenueError::InvalidTargetMonth(label.to_string()))?;
        Ok(Self { first_day })
    }

    pub fn from_ym(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        last_day_of_month(self.first_day)
    }

    /// `Oct-25`
    pub fn label(&self) -> String {
        self.first_day.format("%b-%y").to_string()
    }

    /// `Oct`
    pub fn abbreviation(&self) -> String {
        self.first_day.format("%b").to_string()
    }

    /// `October`
    pub fn full_name(&self) -> String {
        self.first_day.format("%B").to_string()
    }

    pub fn previous(&self) -> Self {
        Self {
            first_day: self.first_day - Months::new(1),
        }
    }

    pub fn next(&self) -> Self {
        Self {
            first_day: self.first_day + Months::new(1),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }

    /// First month of the fiscal year this month belongs to.
    pub fn fiscal_year_start(&self, fiscal_start_month: u32) -> Self {
        let year = if self.month() >= fiscal_start_month {
            self.year()
        } else {
            self.year() - 1
        };
        Self::from_ym(year, fiscal_start_month).unwrap_or(*self)
    }

    /// Every month from the fiscal year start through `self`, inclusive.
    pub fn fiscal_year_to_date(&self, fiscal_start_month: u32) -> Vec<Self> {
        let mut months = Vec::new();
        let mut current = self.fiscal_year_start(fiscal_start_month);
        while current <= *self {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for ReportingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ReportingMonth {
    type Err = RevenueError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ReportingMonth {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for ReportingMonth {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Self::parse(&label).map_err(serde::de::Error::custom)
    }
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    (first + Months::new(1)) - Days::new(1)
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Number of whole calendar months from `start` up to (exclusive) `end`.
/// A month counts only once the same day-of-month is reached, clamping to
/// month end (Jan 31 + 1 month = Feb 28).
pub fn whole_calendar_months(start: NaiveDate, end: NaiveDate) -> i32 {
    if end <= start {
        return 0;
    }
    let mut months = months_between(start, end);
    while months > 0 {
        match start.checked_add_months(Months::new(months as u32)) {
            Some(stepped) if stepped <= end => break,
            _ => months -= 1,
        }
    }
    months
}

/// Inclusive day count between two dates.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y", "%Y-%m-%d", "%Y/%m/%d",
    "%d-%b-%Y", "%d-%b-%y", "%d %b %Y", "%d %B %Y", "%d-%B-%Y", "%b %d, %Y", "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S"];

/// Day-first date parsing for spreadsheet cells.
pub fn parse_sheet_date(raw: &str) -> ParseOutcome<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return ParseOutcome::Defaulted;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return ParseOutcome::Parsed(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return ParseOutcome::Parsed(datetime.date());
        }
    }

    ParseOutcome::Defaulted
}

const AMOUNT_PLACEHOLDERS: &[&str] = &["", "-", "CN", "#REF!"];

/// Currency parsing: placeholders and unreadable text default, thousands
/// separators and quote characters are stripped.
pub fn parse_amount_text(raw: &str) -> ParseOutcome<f64> {
    let text = raw.trim();
    if AMOUNT_PLACEHOLDERS.contains(&text) {
        return ParseOutcome::Defaulted;
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '"' | '\''))
        .collect();

    match cleaned.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => ParseOutcome::Parsed(value),
        _ => ParseOutcome::Defaulted,
    }
}

/// Validates a `YY-YY` fiscal year tag such as `25-26`.
pub fn validate_fiscal_year_tag(tag: &str) -> Result<()> {
    let bytes = tag.as_bytes();
    let well_formed = bytes.len() == 5
        && bytes[2] == b'-'
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[3..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return Err(RevenueError::InvalidFiscalYearTag(tag.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_reporting_month_parse_and_labels() {
        let month = ReportingMonth::parse("Oct-25").unwrap();
        assert_eq!(month.year(), 2025);
        assert_eq!(month.month(), 10);
        assert_eq!(month.label(), "Oct-25");
        assert_eq!(month.abbreviation(), "Oct");
        assert_eq!(month.full_name(), "October");
        assert_eq!(month.first_day(), date(2025, 10, 1));
        assert_eq!(month.last_day(), date(2025, 10, 31));
    }

    #[test]
    fn test_reporting_month_rejects_malformed_labels() {
        assert!(ReportingMonth::parse("2025-10").is_err());
        assert!(ReportingMonth::parse("Octo-25").is_err());
        assert!(ReportingMonth::parse("").is_err());
        assert!(matches!(
            ReportingMonth::parse("13-25"),
            Err(RevenueError::InvalidTargetMonth(_))
        ));
    }

    #[test]
    fn test_previous_and_next_cross_year() {
        let jan = ReportingMonth::parse("Jan-26").unwrap();
        assert_eq!(jan.previous().label(), "Dec-25");
        assert_eq!(jan.previous().next(), jan);
    }

    #[test]
    fn test_fiscal_year_to_date() {
        let oct = ReportingMonth::parse("Oct-25").unwrap();
        let labels: Vec<String> = oct.fiscal_year_to_date(4).iter().map(|m| m.label()).collect();
        assert_eq!(
            labels,
            vec!["Apr-25", "May-25", "Jun-25", "Jul-25", "Aug-25", "Sep-25", "Oct-25"]
        );

        let feb = ReportingMonth::parse("Feb-26").unwrap();
        assert_eq!(feb.fiscal_year_start(4).label(), "Apr-25");
        assert_eq!(feb.fiscal_year_to_date(4).len(), 11);
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(date(2023, 2, 10)), date(2023, 2, 28));
        assert_eq!(last_day_of_month(date(2024, 2, 1)), date(2024, 2, 29));
        assert_eq!(last_day_of_month(date(2023, 12, 31)), date(2023, 12, 31));
    }

    #[test]
    fn test_whole_calendar_months() {
        assert_eq!(whole_calendar_months(date(2025, 9, 15), date(2025, 11, 15)), 2);
        assert_eq!(whole_calendar_months(date(2025, 9, 15), date(2025, 11, 14)), 1);
        assert_eq!(whole_calendar_months(date(2025, 4, 1), date(2026, 4, 1)), 12);
        assert_eq!(whole_calendar_months(date(2025, 1, 31), date(2025, 2, 28)), 1);
        assert_eq!(whole_calendar_months(date(2025, 10, 5), date(2025, 10, 20)), 0);
    }

    #[test]
    fn test_parse_sheet_date_is_day_first() {
        assert_eq!(parse_sheet_date("03/04/2025"), ParseOutcome::Parsed(date(2025, 4, 3)));
        assert_eq!(parse_sheet_date("2025-09-15"), ParseOutcome::Parsed(date(2025, 9, 15)));
        assert_eq!(parse_sheet_date("15-Sep-2025"), ParseOutcome::Parsed(date(2025, 9, 15)));
        assert_eq!(parse_sheet_date(""), ParseOutcome::Defaulted);
        assert_eq!(parse_sheet_date("TBD"), ParseOutcome::Defaulted);
    }

    #[test]
    fn test_parse_amount_text() {
        assert_eq!(parse_amount_text("1,234.50"), ParseOutcome::Parsed(1234.5));
        assert_eq!(parse_amount_text(" 1234.50 "), ParseOutcome::Parsed(1234.5));
        assert_eq!(parse_amount_text("\"9,000\""), ParseOutcome::Parsed(9000.0));
        assert_eq!(parse_amount_text("-"), ParseOutcome::Defaulted);
        assert_eq!(parse_amount_text(""), ParseOutcome::Defaulted);
        assert_eq!(parse_amount_text("CN"), ParseOutcome::Defaulted);
        assert_eq!(parse_amount_text("#REF!"), ParseOutcome::Defaulted);
        assert_eq!(parse_amount_text("n/a"), ParseOutcome::Defaulted);
    }

    #[test]
    fn test_fiscal_year_tag_validation() {
        assert!(validate_fiscal_year_tag("25-26").is_ok());
        assert!(validate_fiscal_year_tag("2025-26").is_err());
        assert!(validate_fiscal_year_tag("ab-cd").is_err());
    }
}
