//! # Finaudit
//!
//! A financial audit pipeline over monthly management accounts: it loads the
//! P&L and cash-flow tables from delimited files or spreadsheets, computes
//! the headline KPIs, renders charts, and assembles the reporting artifacts.
//!
//! ## Core Concepts
//!
//! - **Tables**: monthly P&L and cash-flow statements with a fixed, canonical column schema
//! - **Coercion**: cells are parsed per field; a numeric cell that fails becomes missing (NaN) and is tallied, while an unreadable `Month` cell fails the load
//! - **KPIs**: five indicators in a fixed presentation order, with explicit policies for zero denominators
//! - **Artifacts**: a KPI JSON file, a Markdown executive summary, chart images, an Excel workbook, and a populated Word report
//!
//! ## Example
//!
//! ```rust,ignore
//! use finaudit::{compute_kpis, load_cashflow, load_pnl};
//!
//! let pnl = load_pnl("data/pnl_fictif.csv")?;
//! let cashflow = load_cashflow("data/cashflow_fictif.csv")?;
//!
//! let kpis = compute_kpis(&pnl, &cashflow);
//! println!("{}", kpis.to_json()?);
//! ```

pub mod charts;
pub mod document;
pub mod error;
pub mod kpi;
pub mod loader;
pub mod schema;
pub mod summary;
pub mod workbook;

pub use charts::{plot_timeseries, plot_waterfall};
pub use document::{fill_document, verify_template, DocumentContext};
pub use error::{AuditError, Result};
pub use kpi::{compute_kpis, mean_present, ratio, sum_present, KpiSet, ZeroPolicy};
pub use loader::{
    coerce_month, coerce_numeric, detect_format, load_cashflow, load_pnl, load_table,
    write_table_csv, FieldError, TableFormat,
};
pub use schema::{
    CashflowRecord, CashflowTable, LoadReport, MonthlyRecord, PnlRecord, PnlTable, Table,
};
pub use summary::{format_amount, generate_summary, kpi_label};
pub use workbook::{export_workbook, write_table_xlsx};

use chrono::Local;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// The columns charted over time by default.
pub const DEFAULT_TIMESERIES_METRICS: &[&str] = &["EBITDA", "NetCashFlow"];

/// Input and output locations for one end-to-end audit run.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub pnl_path: PathBuf,
    pub cashflow_path: PathBuf,
    pub template_path: PathBuf,
    pub kpis_out: PathBuf,
    pub summary_out: PathBuf,
    pub report_out: PathBuf,
    pub out_dir: PathBuf,
}

/// What an audit run produced, with the paths the artifacts landed at.
#[derive(Debug, Clone)]
pub struct AuditArtifacts {
    pub kpis: KpiSet,
    pub summary: String,
    pub kpis_json: PathBuf,
    pub charts: Vec<PathBuf>,
    pub workbook: PathBuf,
    pub report: PathBuf,
}

/// Runs the whole pipeline: load both tables, compute the KPIs, then write
/// the KPI JSON, the charts, the Markdown summary, the Excel workbook and
/// the populated report document.
///
/// The report template is read last; callers that want to fail fast on a
/// bad template should run [`verify_template`] first.
pub fn run_audit(options: &AuditOptions) -> Result<AuditArtifacts> {
    info!("loading P&L from {}", options.pnl_path.display());
    let pnl = loader::load_pnl(&options.pnl_path)?;
    info!("loading cash flow from {}", options.cashflow_path.display());
    let cashflow = loader::load_cashflow(&options.cashflow_path)?;
    debug!(
        "{} P&L rows ({} missing cells), {} cash-flow rows ({} missing cells)",
        pnl.len(),
        pnl.report.total_missing(),
        cashflow.len(),
        cashflow.report.total_missing()
    );

    let kpis = kpi::compute_kpis(&pnl, &cashflow);
    if let Some(parent) = options.kpis_out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&options.kpis_out, kpis.to_json()?)?;

    let waterfall = charts::plot_waterfall(&pnl, options.out_dir.join("waterfall.png"))?;
    let mut chart_paths = vec![waterfall];
    chart_paths.extend(charts::plot_timeseries(
        &pnl,
        &cashflow,
        DEFAULT_TIMESERIES_METRICS,
        options.out_dir.join("timeseries"),
    )?);

    let summary = summary::generate_summary(&kpis, &chart_paths, &options.summary_out)?;

    let workbook_path = options.out_dir.join("report.xlsx");
    workbook::export_workbook(&kpis, &pnl, &cashflow, &workbook_path)?;

    let context = DocumentContext {
        report_title: "Financial Audit Report".to_string(),
        report_date: Local::now().date_naive().format("%Y-%m-%d").to_string(),
        executive_summary: summary.clone(),
        conclusion: "Prepared automatically from the monthly management accounts.".to_string(),
        kpis: kpis.clone(),
        images: chart_paths.clone(),
    };
    document::fill_document(
        &options.template_path,
        &context,
        &pnl,
        &cashflow,
        &options.report_out,
    )?;

    info!(
        "audit complete: {} KPIs, {} charts, report at {}",
        kpis.len(),
        chart_paths.len(),
        options.report_out.display()
    );

    Ok(AuditArtifacts {
        kpis,
        summary,
        kpis_json: options.kpis_out.clone(),
        charts: chart_paths,
        workbook: workbook_path,
        report: options.report_out.clone(),
    })
}
