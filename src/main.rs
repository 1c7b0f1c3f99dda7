use clap::Parser;
use finaudit::{run_audit, verify_template, AuditOptions, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "finaudit",
    version,
    about = "Monthly financial audit: KPIs, charts, summary and report generation"
)]
struct Cli {
    /// P&L table (CSV/TSV or spreadsheet)
    #[arg(long, default_value = "data/pnl_fictif.csv")]
    pnl: PathBuf,

    /// Cash-flow table (CSV/TSV or spreadsheet)
    #[arg(long, default_value = "data/cashflow_fictif.csv")]
    cashflow: PathBuf,

    /// Report template package (.docx)
    #[arg(long, default_value = "templates/report_template.docx")]
    template: PathBuf,

    /// Where to write the KPI JSON
    #[arg(long, default_value = "kpis.json")]
    kpis_out: PathBuf,

    /// Where to write the Markdown executive summary
    #[arg(long, default_value = "summary.md")]
    summary_out: PathBuf,

    /// Where to write the populated report
    #[arg(long, default_value = "rapport.docx")]
    report_out: PathBuf,

    /// Directory for charts and the workbook export
    #[arg(long, default_value = "output")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // Fail fast on a bad template instead of after the whole pipeline ran.
    verify_template(&cli.template)?;

    let summary_path = cli.summary_out.clone();
    let artifacts = run_audit(&AuditOptions {
        pnl_path: cli.pnl,
        cashflow_path: cli.cashflow,
        template_path: cli.template,
        kpis_out: cli.kpis_out,
        summary_out: cli.summary_out,
        report_out: cli.report_out,
        out_dir: cli.out_dir,
    })?;

    println!("Audit complete. KPIs, summary and report generated.");
    println!("  KPIs:     {}", artifacts.kpis_json.display());
    println!("  Summary:  {}", summary_path.display());
    println!("  Workbook: {}", artifacts.workbook.display());
    println!("  Report:   {}", artifacts.report.display());

    Ok(())
}
