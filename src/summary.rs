use crate::error::Result;
use crate::kpi::KpiSet;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Renders a KPI key as a heading: `gross_margin_pct` becomes
/// `Gross Margin Pct`.
pub fn kpi_label(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats an amount with thousands separators and two decimals, e.g.
/// `-1,234,567.89`. Undefined values render as `NaN`.
pub fn format_amount(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let rendered = if value > 0.0 { "inf" } else { "-inf" };
        return rendered.to_string();
    }

    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Builds the executive summary in Markdown, writes it to `out_path` and
/// returns the rendered text. KPIs come first as a bullet list in their
/// presentation order, followed by one image reference per chart path.
pub fn generate_summary(
    kpis: &KpiSet,
    image_paths: &[PathBuf],
    out_path: impl AsRef<Path>,
) -> Result<String> {
    let out_path = out_path.as_ref();

    let mut lines: Vec<String> = vec!["# Executive Summary".to_string(), String::new()];
    for (name, value) in kpis.iter() {
        lines.push(format!("- **{}**: {}", kpi_label(name), format_amount(value)));
    }
    lines.push(String::new());
    for image in image_paths {
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!("![{}]({})", file_name, image.display()));
        lines.push(String::new());
    }

    let rendered = lines.join("\n");
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(out_path, &rendered)?;
    debug!("wrote summary to {}", out_path.display());
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kpi_label() {
        assert_eq!(kpi_label("total_revenue"), "Total Revenue");
        assert_eq!(kpi_label("gross_margin_pct"), "Gross Margin Pct");
        assert_eq!(kpi_label("ebitda"), "Ebitda");
    }

    #[test]
    fn test_format_amount_grouping() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(4500.0), "4,500.00");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
        assert_eq!(format_amount(-1234.5), "-1,234.50");
        assert_eq!(format_amount(999.999), "1,000.00");
        assert_eq!(format_amount(0.5125), "0.51");
        assert_eq!(format_amount(f64::NAN), "NaN");
    }
}
