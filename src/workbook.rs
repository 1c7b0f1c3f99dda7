use crate::error::Result;
use crate::kpi::KpiSet;
use crate::schema::{CashflowTable, MonthlyRecord, PnlTable, Table};
use log::debug;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::fs;
use std::path::Path;

pub const KPI_SHEET: &str = "KPIs";
pub const PNL_SHEET: &str = "P&L";
pub const CASHFLOW_SHEET: &str = "Cashflow";

fn write_table_sheet<R: MonthlyRecord>(sheet: &mut Worksheet, table: &Table<R>) -> Result<()> {
    for (col, name) in R::COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }
    for (i, record) in table.records.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, record.month().format("%Y-%m-%d").to_string())?;
        for (j, v) in record.values().iter().enumerate() {
            // NaN cannot live in a cell; missing stays a blank.
            if !v.is_nan() {
                sheet.write_number(row, (j + 1) as u16, *v)?;
            }
        }
    }
    Ok(())
}

/// Writes a single table as a one-sheet workbook with the canonical header
/// row, so a spreadsheet written here reloads through the same schema.
pub fn write_table_xlsx<R: MonthlyRecord>(table: &Table<R>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    write_table_sheet(sheet, table)?;
    workbook.save(path)?;
    Ok(())
}

/// Exports the full audit workbook: a `KPIs` sheet with name/value pairs,
/// then the two source tables on their own sheets. Undefined KPI values
/// leave their cell blank.
pub fn export_workbook(
    kpis: &KpiSet,
    pnl: &PnlTable,
    cashflow: &CashflowTable,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(KPI_SHEET)?;
    sheet.write_string(0, 0, "KPI")?;
    sheet.write_string(0, 1, "Value")?;
    for (i, (name, value)) in kpis.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, name)?;
        if !value.is_nan() {
            sheet.write_number(row, 1, value)?;
        }
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(PNL_SHEET)?;
    write_table_sheet(sheet, pnl)?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(CASHFLOW_SHEET)?;
    write_table_sheet(sheet, cashflow)?;

    workbook.save(path)?;
    debug!("wrote workbook to {}", path.display());
    Ok(())
}
