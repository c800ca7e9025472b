use crate::error::Result;
use crate::normalizer::split_keys;
use crate::schema::{MatchedContract, PipelineConfig};
use crate::table::{Cell, Table};
use log::{debug, info};
use std::collections::HashMap;

/// Joins invoices to contract terms through the (already normalized) invoice
/// keys of the master sheet.
///
/// Each master row is expanded into one lookup entry per listed key, and the
/// invoice table is inner-joined against those entries. Invoices without
/// contract terms and contracts without invoices are dropped.
pub fn match_invoices(
    invoices: &Table,
    master: &Table,
    config: &PipelineConfig,
) -> Result<Vec<MatchedContract>> {
    let columns = &config.columns;
    let key_col = master.require_column(&columns.invoice)?;
    let number_col = invoices.require_column(&columns.invoice_number)?;
    let customer_col = invoices.require_column(&columns.customer_name)?;

    let nature_col = master.column_index(&columns.nature_of_service);
    let start_col = master.column_index(&columns.start_date);
    let end_col = master.column_index(&columns.end_date);
    let cycle_col = master.column_index(&columns.payment_cycle);
    let amount_col = master.column_index(&columns.contract_amount);

    // key -> master rows listing it, in sheet order
    let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..master.row_count() {
        let listed = master.get(row, key_col).to_string();
        for key in split_keys(&listed) {
            lookup.entry(key.to_string()).or_default().push(row);
        }
    }

    if lookup.is_empty() {
        info!("Master sheet lists no invoice keys; nothing to match");
        return Ok(Vec::new());
    }

    let pick = |row: usize, col: Option<usize>| -> Cell {
        col.map(|c| master.get(row, c).clone()).unwrap_or_default()
    };

    let mut matched = Vec::new();
    for inv_row in 0..invoices.row_count() {
        let number = invoices.get(inv_row, number_col).trimmed();
        let Some(master_rows) = lookup.get(&number) else {
            continue;
        };

        let customer_name = invoices.get(inv_row, customer_col).trimmed();
        for &row in master_rows {
            matched.push(MatchedContract {
                invoice_number: number.clone(),
                customer_name: customer_name.clone(),
                nature_of_service: pick(row, nature_col),
                start_date: pick(row, start_col),
                end_date: pick(row, end_col),
                payment_cycle: pick(row, cycle_col),
                contract_amount: pick(row, amount_col),
            });
        }
    }

    debug!(
        "Matched {} of {} invoices against {} contract keys",
        matched.len(),
        invoices.row_count(),
        lookup.len()
    );
    Ok(matched)
}
