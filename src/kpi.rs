use crate::schema::{CashflowTable, PnlTable};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// What an aggregate yields when its denominator is zero: margins over zero
/// revenue default to zero, while a mean over an empty column has no
/// meaningful value and stays undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroPolicy {
    ZeroAsDefault,
    PropagateUndefined,
}

/// Sum of the present (non-NaN) values. An empty or all-missing input sums
/// to zero.
pub fn sum_present(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().filter(|v| !v.is_nan()).sum()
}

/// Mean of the present (non-NaN) values, with the zero-count case resolved
/// by `policy`.
pub fn mean_present(values: impl IntoIterator<Item = f64>, policy: ZeroPolicy) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.into_iter().filter(|v| !v.is_nan()) {
        sum += v;
        count += 1;
    }
    ratio(sum, count as f64, policy)
}

/// Guarded division. A zero denominator is resolved by `policy` instead of
/// producing an infinity.
pub fn ratio(numerator: f64, denominator: f64, policy: ZeroPolicy) -> f64 {
    if denominator == 0.0 {
        return match policy {
            ZeroPolicy::ZeroAsDefault => 0.0,
            ZeroPolicy::PropagateUndefined => f64::NAN,
        };
    }
    numerator / denominator
}

/// The computed indicators, in a fixed presentation order. Serializes to a
/// JSON object whose keys keep that order.
#[derive(Debug, Clone)]
pub struct KpiSet {
    entries: Vec<(&'static str, f64)>,
}

impl KpiSet {
    fn push(&mut self, name: &'static str, value: f64) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for KpiSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Computes the audit indicators from the two normalized tables.
///
/// The set always holds, in order: `total_revenue`, `gross_margin_pct`,
/// `ebitda_margin_pct`, `avg_operating_cf`, `avg_net_cashflow`. Margins are
/// fractions of total revenue (0.25 means 25%) and fall back to zero when
/// total revenue is zero; the cash-flow means are NaN when their column has
/// no present values.
pub fn compute_kpis(pnl: &PnlTable, cashflow: &CashflowTable) -> KpiSet {
    let total_revenue = sum_present(pnl.records.iter().map(|r| r.revenue));
    let total_gross_profit = sum_present(pnl.records.iter().map(|r| r.gross_profit));
    let total_ebitda = sum_present(pnl.records.iter().map(|r| r.ebitda));

    let mut kpis = KpiSet { entries: Vec::with_capacity(5) };
    kpis.push("total_revenue", total_revenue);
    kpis.push(
        "gross_margin_pct",
        ratio(total_gross_profit, total_revenue, ZeroPolicy::ZeroAsDefault),
    );
    kpis.push(
        "ebitda_margin_pct",
        ratio(total_ebitda, total_revenue, ZeroPolicy::ZeroAsDefault),
    );
    kpis.push(
        "avg_operating_cf",
        mean_present(
            cashflow.records.iter().map(|r| r.operating_cf),
            ZeroPolicy::PropagateUndefined,
        ),
    );
    kpis.push(
        "avg_net_cashflow",
        mean_present(
            cashflow.records.iter().map(|r| r.net_cash_flow),
            ZeroPolicy::PropagateUndefined,
        ),
    );
    kpis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CashflowRecord, LoadReport, MonthlyRecord, PnlRecord, Table};
    use chrono::NaiveDate;

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, 1).unwrap()
    }

    fn sample_tables() -> (PnlTable, CashflowTable) {
        let pnl = Table::new(
            vec![
                PnlRecord::from_values(
                    month(1),
                    &[1000.0, 400.0, 600.0, 100.0, 50.0, 25.0, 175.0, 425.0],
                ),
                PnlRecord::from_values(
                    month(2),
                    &[2000.0, 800.0, 1200.0, 100.0, 50.0, 25.0, 175.0, 1025.0],
                ),
                PnlRecord::from_values(
                    month(3),
                    &[3000.0, 1200.0, 1800.0, 100.0, 50.0, 25.0, 175.0, 1625.0],
                ),
            ],
            LoadReport::default(),
        );
        let cashflow = Table::new(
            vec![
                CashflowRecord::from_values(month(1), &[400.0, -50.0, 100.0, 450.0]),
                CashflowRecord::from_values(month(2), &[800.0, -50.0, -100.0, 650.0]),
                CashflowRecord::from_values(month(3), &[1200.0, -50.0, 0.0, 1150.0]),
            ],
            LoadReport::default(),
        );
        (pnl, cashflow)
    }

    #[test]
    fn test_sum_present_skips_missing() {
        assert_eq!(sum_present([1.0, f64::NAN, 2.0]), 3.0);
        assert_eq!(sum_present(Vec::<f64>::new()), 0.0);
        assert_eq!(sum_present([f64::NAN, f64::NAN]), 0.0);
    }

    #[test]
    fn test_mean_present_policies() {
        assert_eq!(
            mean_present([2.0, f64::NAN, 4.0], ZeroPolicy::PropagateUndefined),
            3.0
        );
        assert!(mean_present(Vec::<f64>::new(), ZeroPolicy::PropagateUndefined).is_nan());
        assert_eq!(mean_present(Vec::<f64>::new(), ZeroPolicy::ZeroAsDefault), 0.0);
    }

    #[test]
    fn test_ratio_policies() {
        assert_eq!(ratio(1.0, 2.0, ZeroPolicy::ZeroAsDefault), 0.5);
        assert_eq!(ratio(1.0, 0.0, ZeroPolicy::ZeroAsDefault), 0.0);
        assert!(ratio(1.0, 0.0, ZeroPolicy::PropagateUndefined).is_nan());
    }

    #[test]
    fn test_compute_kpis_reference_values() {
        let (pnl, cashflow) = sample_tables();
        let kpis = compute_kpis(&pnl, &cashflow);

        assert_eq!(kpis.len(), 5);
        assert!((kpis.get("total_revenue").unwrap() - 6000.0).abs() < 1e-9);
        assert!((kpis.get("gross_margin_pct").unwrap() - 0.6).abs() < 1e-9);
        assert!((kpis.get("ebitda_margin_pct").unwrap() - 0.5125).abs() < 1e-9);
        assert!((kpis.get("avg_operating_cf").unwrap() - 800.0).abs() < 1e-9);
        assert!((kpis.get("avg_net_cashflow").unwrap() - 750.0).abs() < 1e-9);
        println!("✓ KPI reference values verified");
    }

    #[test]
    fn test_zero_revenue_defaults_margins_to_zero() {
        let pnl = Table::new(
            vec![PnlRecord::from_values(
                month(1),
                &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )],
            LoadReport::default(),
        );
        let cashflow = Table::new(
            vec![CashflowRecord::from_values(month(1), &[10.0, 0.0, 0.0, 10.0])],
            LoadReport::default(),
        );

        let kpis = compute_kpis(&pnl, &cashflow);
        assert_eq!(kpis.get("gross_margin_pct").unwrap(), 0.0);
        assert_eq!(kpis.get("ebitda_margin_pct").unwrap(), 0.0);
    }

    #[test]
    fn test_empty_tables_yield_degenerate_kpis() {
        let pnl: PnlTable = Table::new(Vec::new(), LoadReport::default());
        let cashflow: CashflowTable = Table::new(Vec::new(), LoadReport::default());

        let kpis = compute_kpis(&pnl, &cashflow);
        assert_eq!(kpis.get("total_revenue").unwrap(), 0.0);
        assert_eq!(kpis.get("gross_margin_pct").unwrap(), 0.0);
        assert_eq!(kpis.get("ebitda_margin_pct").unwrap(), 0.0);
        assert!(kpis.get("avg_operating_cf").unwrap().is_nan());
        assert!(kpis.get("avg_net_cashflow").unwrap().is_nan());
    }

    #[test]
    fn test_missing_cells_are_excluded_not_poisoning() {
        let cashflow = Table::new(
            vec![
                CashflowRecord::from_values(month(1), &[400.0, -50.0, 100.0, 450.0]),
                CashflowRecord::from_values(month(2), &[f64::NAN, -50.0, 0.0, 650.0]),
            ],
            LoadReport::default(),
        );
        let pnl: PnlTable = Table::new(Vec::new(), LoadReport::default());

        let kpis = compute_kpis(&pnl, &cashflow);
        assert_eq!(kpis.get("avg_operating_cf").unwrap(), 400.0);
        assert_eq!(kpis.get("avg_net_cashflow").unwrap(), 550.0);
    }

    #[test]
    fn test_json_preserves_presentation_order() {
        let (pnl, cashflow) = sample_tables();
        let json = compute_kpis(&pnl, &cashflow).to_json().unwrap();

        let order = [
            "total_revenue",
            "gross_margin_pct",
            "ebitda_margin_pct",
            "avg_operating_cf",
            "avg_net_cashflow",
        ];
        let positions: Vec<usize> = order.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        println!("Serialized KPIs:\n{}", json);
    }

    #[test]
    fn test_undefined_means_serialize_as_null() {
        let pnl: PnlTable = Table::new(Vec::new(), LoadReport::default());
        let cashflow: CashflowTable = Table::new(Vec::new(), LoadReport::default());

        let json = compute_kpis(&pnl, &cashflow).to_json().unwrap();
        assert!(json.contains("\"avg_operating_cf\": null"));
    }
}
