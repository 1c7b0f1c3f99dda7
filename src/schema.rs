use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row type keyed by a calendar month, with a fixed set of numeric columns.
///
/// `COLUMNS` is the canonical header row: `Month` first, then the numeric
/// columns in file order. `values()` returns the numeric columns in that same
/// order, with missing cells carried as `f64::NAN`.
pub trait MonthlyRecord: Sized {
    const COLUMNS: &'static [&'static str];

    /// Builds a record from a month and one value per numeric column.
    /// `values` must hold exactly `COLUMNS.len() - 1` entries.
    fn from_values(month: NaiveDate, values: &[f64]) -> Self;

    fn month(&self) -> NaiveDate;

    fn values(&self) -> Vec<f64>;
}

/// One month of the profit and loss statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlRecord {
    pub month: NaiveDate,
    pub revenue: f64,
    pub cogs: f64,
    pub gross_profit: f64,
    pub opex_rnd: f64,
    pub opex_sales_marketing: f64,
    pub opex_ga: f64,
    pub opex_total: f64,
    pub ebitda: f64,
}

impl MonthlyRecord for PnlRecord {
    const COLUMNS: &'static [&'static str] = &[
        "Month",
        "Revenue",
        "COGS",
        "GrossProfit",
        "Opex_RnD",
        "Opex_SalesMarketing",
        "Opex_GA",
        "Opex_Total",
        "EBITDA",
    ];

    fn from_values(month: NaiveDate, values: &[f64]) -> Self {
        Self {
            month,
            revenue: values[0],
            cogs: values[1],
            gross_profit: values[2],
            opex_rnd: values[3],
            opex_sales_marketing: values[4],
            opex_ga: values[5],
            opex_total: values[6],
            ebitda: values[7],
        }
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn values(&self) -> Vec<f64> {
        vec![
            self.revenue,
            self.cogs,
            self.gross_profit,
            self.opex_rnd,
            self.opex_sales_marketing,
            self.opex_ga,
            self.opex_total,
            self.ebitda,
        ]
    }
}

/// One month of the cash-flow statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashflowRecord {
    pub month: NaiveDate,
    pub operating_cf: f64,
    pub capex: f64,
    pub delta_bfr: f64,
    pub net_cash_flow: f64,
}

impl MonthlyRecord for CashflowRecord {
    const COLUMNS: &'static [&'static str] =
        &["Month", "OperatingCF", "CAPEX", "Delta_BFR", "NetCashFlow"];

    fn from_values(month: NaiveDate, values: &[f64]) -> Self {
        Self {
            month,
            operating_cf: values[0],
            capex: values[1],
            delta_bfr: values[2],
            net_cash_flow: values[3],
        }
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn values(&self) -> Vec<f64> {
        vec![self.operating_cf, self.capex, self.delta_bfr, self.net_cash_flow]
    }
}

/// What the loader saw while coercing a file: row count plus per-column
/// tallies of cells that failed numeric coercion and were carried as NaN.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub rows: usize,
    pub missing: BTreeMap<String, usize>,
}

impl LoadReport {
    pub fn record_missing(&mut self, column: &str) {
        *self.missing.entry(column.to_string()).or_insert(0) += 1;
    }

    pub fn missing_in(&self, column: &str) -> usize {
        self.missing.get(column).copied().unwrap_or(0)
    }

    pub fn total_missing(&self) -> usize {
        self.missing.values().sum()
    }
}

/// A normalized table: records in input order plus the load report for the
/// file they came from.
#[derive(Debug, Clone)]
pub struct Table<R: MonthlyRecord> {
    pub records: Vec<R>,
    pub report: LoadReport,
}

pub type PnlTable = Table<PnlRecord>;
pub type CashflowTable = Table<CashflowRecord>;

impl<R: MonthlyRecord> Table<R> {
    pub fn new(records: Vec<R>, report: LoadReport) -> Self {
        Self { records, report }
    }

    pub fn headers() -> &'static [&'static str] {
        R::COLUMNS
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of a numeric column within `values()`, or None for `Month`
    /// and unknown names.
    pub fn column_index(name: &str) -> Option<usize> {
        R::COLUMNS[1..].iter().position(|c| *c == name)
    }

    /// The (month, value) pairs of one numeric column, in record order.
    pub fn series(&self, name: &str) -> Option<Vec<(NaiveDate, f64)>> {
        let idx = Self::column_index(name)?;
        Some(
            self.records
                .iter()
                .map(|r| (r.month(), r.values()[idx]))
                .collect(),
        )
    }

    /// Month-keyed view of one numeric column. First occurrence wins when a
    /// month repeats.
    pub fn by_month(&self, name: &str) -> Option<BTreeMap<NaiveDate, f64>> {
        let idx = Self::column_index(name)?;
        let mut out = BTreeMap::new();
        for r in &self.records {
            out.entry(r.month()).or_insert_with(|| r.values()[idx]);
        }
        Some(out)
    }
}
