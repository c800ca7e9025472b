//! Canonical invoice keys.
//!
//! Invoice references in the contract sheets are typed by hand: several keys
//! per cell, shared prefixes written once (`INV-25-26-12/13/14`), credit note
//! ranges mixed in (`CN 4 to 6`), arbitrary separators. Everything is reduced
//! to comma-joined `INV-YY-YY-NNNNNN` keys.

use crate::error::Result;
use crate::table::{Cell, Table};
use crate::utils::validate_fiscal_year_tag;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

static CREDIT_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCN[\s\-]*\d+(?:\s*to\s*\d+)?").expect("valid regex"));
static QUALIFIED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"INV-(\d{2})-(\d{2})-").expect("valid regex"));
static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,_'\-()\[\]/\n\r]").expect("valid regex"));
static FULL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INV-(\d{2}-\d{2})-?(\d*)").expect("valid regex"));
static SHORT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^INV-?(\d+)").expect("valid regex"));

/// `~` stands in for the dashes of an `INV` prefix while every other dash is
/// treated as a separator.
const PROTECTED_DASH: char = '~';

#[derive(Debug, Clone)]
pub struct InvoiceKeyNormalizer {
    default_fiscal_year: String,
}

impl InvoiceKeyNormalizer {
    pub fn new(default_fiscal_year: &str) -> Result<Self> {
        validate_fiscal_year_tag(default_fiscal_year)?;
        Ok(Self {
            default_fiscal_year: default_fiscal_year.to_string(),
        })
    }

    pub fn normalize(&self, text: &str) -> String {
        self.keys(text).join(", ")
    }

    /// Canonical keys in the order they appear. Tokens without digits are
    /// dropped; a fully qualified token changes the prefix used by the bare
    /// numbers that follow it.
    pub fn keys(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let text = CREDIT_NOTE.replace_all(text, "");
        let text = QUALIFIED_PREFIX.replace_all(&text, "INV~${1}~${2}~");
        let text = text.replace("INV-", "INV~");
        let text = SEPARATORS.replace_all(&text, " ");

        let mut prefix = format!("INV-{}-", self.default_fiscal_year);
        let mut keys = Vec::new();

        for raw_token in text.split_whitespace() {
            let token = raw_token.replace(PROTECTED_DASH, "-");
            if !token.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }

            if let Some(caps) = FULL_TOKEN.captures(&token) {
                prefix = format!("INV-{}-", &caps[1]);
                let number = &caps[2];
                if !number.is_empty() {
                    keys.push(format!("{}{:0>6}", prefix, number));
                }
            } else if let Some(caps) = SHORT_TOKEN.captures(&token) {
                keys.push(format!("{}{:0>6}", prefix, &caps[1]));
            } else if token.chars().all(|c| c.is_ascii_digit()) {
                keys.push(format!("{}{:0>6}", prefix, token));
            }
        }

        keys
    }

    /// Rewrites every cell of `column` in place. A table without the column
    /// is left untouched.
    pub fn normalize_column(&self, table: &mut Table, column: &str) {
        let Some(col) = table.column_index(column) else {
            debug!(
                "Table '{}' has no '{}' column; skipping invoice normalization",
                table.name(),
                column
            );
            return;
        };

        for row in 0..table.row_count() {
            let normalized = self.normalize(&table.get(row, col).to_string());
            table.set(row, col, Cell::from_raw(&normalized));
        }
    }
}

/// Splits a stored comma-joined key list.
pub fn split_keys(joined: &str) -> impl Iterator<Item = &str> {
    joined.split(',').map(str::trim).filter(|k| !k.is_empty())
}
