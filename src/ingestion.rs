use crate::error::Result;
use crate::schema::{InvoiceRow, PipelineConfig};
use crate::store::Workbook;
use crate::table::{RawSheet, Table};
use log::{debug, info};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Reads the contract master sheet and checks the columns the matcher needs.
pub fn load_master(workbook: &Workbook, config: &PipelineConfig) -> Result<Table> {
    let name = &config.sheets.master;
    let table = Table::from_raw(
        name.as_str(),
        workbook.require_sheet(name)?,
        config.header_rows.master,
    );
    table.require_column(&config.columns.invoice)?;
    debug!("Master sheet '{}' has {} contract rows", name, table.row_count());
    Ok(table)
}

/// Reads the invoice register, dropping rows that repeat an earlier row.
pub fn load_invoices(workbook: &Workbook, config: &PipelineConfig) -> Result<Table> {
    let name = &config.sheets.invoices;
    let mut table = Table::from_raw(
        name.as_str(),
        workbook.require_sheet(name)?,
        config.header_rows.invoices,
    );
    table.require_column(&config.columns.invoice_number)?;
    table.require_column(&config.columns.customer_name)?;

    let dropped = table.drop_duplicate_rows();
    if dropped > 0 {
        info!("Dropped {} duplicate invoice rows from '{}'", dropped, name);
    }
    Ok(table)
}

pub fn invoice_rows(table: &Table, config: &PipelineConfig) -> Result<Vec<InvoiceRow>> {
    let number_col = table.require_column(&config.columns.invoice_number)?;
    let customer_col = table.require_column(&config.columns.customer_name)?;
    let nature_col = table.column_index(&config.columns.nature);

    Ok((0..table.row_count())
        .map(|row| InvoiceRow {
            invoice_number: table.get(row, number_col).trimmed(),
            customer_name: table.get(row, customer_col).trimmed(),
            nature: nature_col
                .map(|col| table.get(row, col).trimmed())
                .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("nan")),
        })
        .collect())
}

/// Reads a sheet-shaped CSV: no header handling, ragged rows allowed.
pub fn read_raw_sheet<R: Read>(reader: R) -> Result<RawSheet> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawSheet::new(rows))
}

pub fn write_raw_sheet<W: Write>(sheet: &RawSheet, writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(writer);
    for row in &sheet.rows {
        csv_writer.write_record(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn read_raw_sheet_file<P: AsRef<Path>>(path: P) -> Result<RawSheet> {
    read_raw_sheet(File::open(path)?)
}

pub fn write_raw_sheet_file<P: AsRef<Path>>(sheet: &RawSheet, path: P) -> Result<()> {
    write_raw_sheet(sheet, File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RevenueError;

    fn grid(rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_load_invoices_dedupes_and_reads_nature() {
        let config = PipelineConfig::default();
        let mut workbook = Workbook::new();
        workbook.insert(
            config.sheets.invoices.clone(),
            grid(&[
                &["Invoice Number", "Customer Name", "Nature"],
                &["INV-25-26-000001", "Acme", "B2B"],
                &["INV-25-26-000001", "Acme", "B2B"],
                &["INV-25-26-000002", "Jane B2C", ""],
            ]),
        );

        let table = load_invoices(&workbook, &config).unwrap();
        assert_eq!(table.row_count(), 2);

        let rows = invoice_rows(&table, &config).unwrap();
        assert_eq!(rows[0].nature.as_deref(), Some("B2B"));
        assert_eq!(rows[1].nature, None);
    }

    #[test]
    fn test_load_master_requires_invoice_column() {
        let config = PipelineConfig::default();
        let mut workbook = Workbook::new();
        workbook.insert(
            config.sheets.master.clone(),
            grid(&[&["title"], &["meta"], &["Customer Name", "Start Date "]]),
        );

        assert!(matches!(
            load_master(&workbook, &config),
            Err(RevenueError::MissingColumn { ref column, .. }) if column == "Invoice"
        ));
    }

    #[test]
    fn test_missing_master_sheet() {
        let config = PipelineConfig::default();
        assert!(matches!(
            load_master(&Workbook::new(), &config),
            Err(RevenueError::MissingTable(_))
        ));
    }

    #[test]
    fn test_csv_round_trip_keeps_ragged_rows() {
        let sheet = grid(&[&["a", "b, c"], &["1"], &["", "x\ny"]]);
        let mut buffer = Vec::new();
        write_raw_sheet(&sheet, &mut buffer).unwrap();

        let parsed = read_raw_sheet(buffer.as_slice()).unwrap();
        assert_eq!(parsed, sheet);
    }
}
