use crate::error::{AuditError, Result};
use crate::kpi::sum_present;
use crate::schema::{CashflowTable, PnlTable};
use chrono::NaiveDate;
use log::debug;
use plotters::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const CHART_SIZE: (u32, u32) = (800, 600);

fn chart_err(e: impl std::fmt::Display) -> AuditError {
    AuditError::Chart(e.to_string())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Pads a value range by 10% and keeps zero in view. Degenerate ranges are
/// widened so the chart always builds.
fn padded_range(values: &[f64]) -> (f64, f64) {
    let mut lo = 0.0f64;
    let mut hi = 0.0f64;
    for v in values.iter().filter(|v| !v.is_nan()) {
        lo = lo.min(*v);
        hi = hi.max(*v);
    }
    if (hi - lo).abs() < f64::EPSILON {
        lo -= 1.0;
        hi += 1.0;
    }
    let pad = (hi - lo) * 0.1;
    (lo - pad, hi + pad)
}

/// Splits a sampled column into runs of present values so missing months
/// leave visible gaps instead of bridged lines.
fn present_segments(values: &[f64]) -> Vec<Vec<(usize, f64)>> {
    let mut segments = Vec::new();
    let mut current: Vec<(usize, f64)> = Vec::new();
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        } else {
            current.push((i, *v));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Renders the four-step EBITDA build-up (revenue, cost of goods sold, total
/// opex, EBITDA) as a bar chart and writes it to `out_path` as a PNG.
/// Costs are drawn as negative bars.
pub fn plot_waterfall(pnl: &PnlTable, out_path: impl AsRef<Path>) -> Result<PathBuf> {
    let out_path = out_path.as_ref();
    ensure_parent(out_path)?;

    let steps = [
        sum_present(pnl.records.iter().map(|r| r.revenue)),
        -sum_present(pnl.records.iter().map(|r| r.cogs)),
        -sum_present(pnl.records.iter().map(|r| r.opex_total)),
        sum_present(pnl.records.iter().map(|r| r.ebitda)),
    ];
    let (y_lo, y_hi) = padded_range(&steps);

    let root = BitMapBackend::new(out_path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d((0usize..steps.len()).into_segmented(), y_lo..y_hi)
        .map_err(chart_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(chart_err)?;

    chart
        .draw_series(steps.iter().enumerate().map(|(i, v)| {
            let color = Palette99::pick(i);
            Rectangle::new(
                [
                    (SegmentValue::Exact(i), 0.0),
                    (SegmentValue::Exact(i + 1), *v),
                ],
                color.filled(),
            )
        }))
        .map_err(chart_err)?;

    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![
                (SegmentValue::Exact(0), 0.0),
                (SegmentValue::Exact(steps.len()), 0.0),
            ],
            BLACK.stroke_width(1),
        )))
        .map_err(chart_err)?;

    root.present().map_err(chart_err)?;
    debug!("wrote waterfall chart to {}", out_path.display());
    Ok(out_path.to_path_buf())
}

fn joined_months(pnl: &PnlTable, cashflow: &CashflowTable) -> Vec<NaiveDate> {
    let pnl_months: BTreeSet<NaiveDate> = pnl.records.iter().map(|r| r.month).collect();
    let cashflow_months: BTreeSet<NaiveDate> =
        cashflow.records.iter().map(|r| r.month).collect();
    pnl_months.intersection(&cashflow_months).copied().collect()
}

fn sample_metric(
    pnl: &PnlTable,
    cashflow: &CashflowTable,
    months: &[NaiveDate],
    metric: &str,
) -> Result<Vec<f64>> {
    let by_month = pnl
        .by_month(metric)
        .or_else(|| cashflow.by_month(metric))
        .ok_or_else(|| AuditError::Chart(format!("unknown metric '{}'", metric)))?;
    Ok(months
        .iter()
        .map(|m| by_month.get(m).copied().unwrap_or(f64::NAN))
        .collect())
}

/// Renders one line chart per metric over the months common to both tables,
/// written as `<out_dir>/<metric>.png`. Metric names are resolved against
/// the P&L columns first, then the cash-flow columns. Paths come back in
/// metric order.
pub fn plot_timeseries(
    pnl: &PnlTable,
    cashflow: &CashflowTable,
    metrics: &[&str],
    out_dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;

    let months = joined_months(pnl, cashflow);
    let mut paths = Vec::with_capacity(metrics.len());

    for (series_no, metric) in metrics.iter().enumerate() {
        let values = sample_metric(pnl, cashflow, &months, metric)?;
        let out_path = out_dir.join(format!("{}.png", metric));

        let root = BitMapBackend::new(&out_path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        if !months.is_empty() {
            let (y_lo, y_hi) = padded_range(&values);
            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .build_cartesian_2d(0usize..months.len(), y_lo..y_hi)
                .map_err(chart_err)?;

            chart
                .configure_mesh()
                .x_labels(0)
                .y_labels(0)
                .draw()
                .map_err(chart_err)?;

            let color = Palette99::pick(series_no);
            for segment in present_segments(&values) {
                if segment.len() > 1 {
                    chart
                        .draw_series(std::iter::once(PathElement::new(
                            segment.clone(),
                            color.stroke_width(2),
                        )))
                        .map_err(chart_err)?;
                }
                chart
                    .draw_series(
                        segment
                            .iter()
                            .map(|(i, v)| Circle::new((*i, *v), 4, color.filled())),
                    )
                    .map_err(chart_err)?;
            }
        }

        root.present().map_err(chart_err)?;
        debug!("wrote {} chart to {}", metric, out_path.display());
        paths.push(out_path.clone());
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_segments_split_on_missing() {
        let values = [1.0, 2.0, f64::NAN, 4.0, 5.0, f64::NAN];
        let segments = present_segments(&values);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], vec![(0, 1.0), (1, 2.0)]);
        assert_eq!(segments[1], vec![(3, 4.0), (4, 5.0)]);

        assert!(present_segments(&[f64::NAN, f64::NAN]).is_empty());
        assert_eq!(present_segments(&[7.0]).len(), 1);
    }

    #[test]
    fn test_padded_range_always_spans_zero() {
        let (lo, hi) = padded_range(&[100.0, -40.0, 60.0]);
        assert!(lo < -40.0);
        assert!(hi > 100.0);

        let (lo, hi) = padded_range(&[]);
        assert!(lo < hi);
        assert!(lo <= 0.0 && 0.0 <= hi);
    }
}
