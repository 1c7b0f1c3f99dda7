use crate::error::{AuditError, Result};
use crate::kpi::KpiSet;
use crate::schema::{CashflowRecord, CashflowTable, MonthlyRecord, PnlRecord, PnlTable, Table};
use crate::summary::format_amount;
use log::{debug, warn};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

const DOCUMENT_NAME: &str = "word/document.xml";
const RELS_NAME: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_NAME: &str = "[Content_Types].xml";
const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const EMPTY_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
</Relationships>";

// Embedded charts render at 12 x 9 cm.
const EMU_WIDTH: u32 = 4_320_000;
const EMU_HEIGHT: u32 = 3_240_000;

/// Everything the report template is populated with. Placeholders
/// (`{{report_title}}`, `{{report_date}}`, `{{executive_summary}}`,
/// `{{conclusion}}`) are substituted in place; the KPI table, the two data
/// tables and the chart images are appended at the end of the body.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub report_title: String,
    pub report_date: String,
    pub executive_summary: String,
    pub conclusion: String,
    pub kpis: KpiSet,
    pub images: Vec<PathBuf>,
}

/// Checks that `path` exists and holds a usable report template: a zip
/// package with a `word/document.xml` part.
pub fn verify_template(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AuditError::NotFound(path.to_path_buf()));
    }
    let file = fs::File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        AuditError::Template(format!("{} is not a document package: {}", path.display(), e))
    })?;
    archive.by_name(DOCUMENT_NAME).map_err(|_| {
        AuditError::Template(format!(
            "{} has no {} part",
            path.display(),
            DOCUMENT_NAME
        ))
    })?;
    Ok(())
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes a substitution value and turns newlines into run breaks. Assumes
/// the placeholder sits inside a single `<w:t>` element.
fn placeholder_xml(value: &str) -> String {
    xml_escape(&value.replace('\r', ""))
        .split('\n')
        .collect::<Vec<_>>()
        .join("</w:t><w:br/><w:t xml:space=\"preserve\">")
}

fn docx_heading(text: &str) -> String {
    format!(
        "<w:p><w:pPr><w:pStyle w:val=\"Heading2\"/></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>",
        xml_escape(text)
    )
}

fn docx_cell(text: &str, bold: bool) -> String {
    let properties = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        "<w:tc><w:p><w:r>{}<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p></w:tc>",
        properties,
        xml_escape(text)
    )
}

fn docx_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut xml = String::new();
    xml.push_str("<w:tbl><w:tblPr><w:tblW w:w=\"0\" w:type=\"auto\"/><w:tblBorders>");
    for edge in ["top", "left", "bottom", "right", "insideH", "insideV"] {
        xml.push_str(&format!(
            "<w:{} w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>",
            edge
        ));
    }
    xml.push_str("</w:tblBorders></w:tblPr><w:tblGrid>");
    for _ in headers {
        xml.push_str("<w:gridCol w:w=\"1700\"/>");
    }
    xml.push_str("</w:tblGrid><w:tr>");
    for header in headers {
        xml.push_str(&docx_cell(header, true));
    }
    xml.push_str("</w:tr>");
    for row in rows {
        xml.push_str("<w:tr>");
        for cell in row {
            xml.push_str(&docx_cell(cell, false));
        }
        xml.push_str("</w:tr>");
    }
    xml.push_str("</w:tbl><w:p/>");
    xml
}

fn drawing_xml(rel_id: &str, doc_pr_id: usize, name: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<w:p><w:r><w:drawing>");
    xml.push_str(&format!(
        "<wp:inline distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\" \
xmlns:wp=\"http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing\">\
<wp:extent cx=\"{}\" cy=\"{}\"/><wp:docPr id=\"{}\" name=\"{}\"/>",
        EMU_WIDTH,
        EMU_HEIGHT,
        doc_pr_id,
        xml_escape(name)
    ));
    xml.push_str(
        "<a:graphic xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\">\
<a:graphicData uri=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">\
<pic:pic xmlns:pic=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">",
    );
    xml.push_str(&format!(
        "<pic:nvPicPr><pic:cNvPr id=\"{}\" name=\"{}\"/><pic:cNvPicPr/></pic:nvPicPr>",
        doc_pr_id,
        xml_escape(name)
    ));
    xml.push_str(&format!(
        "<pic:blipFill><a:blip r:embed=\"{}\" \
xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"/>\
<a:stretch><a:fillRect/></a:stretch></pic:blipFill>",
        rel_id
    ));
    xml.push_str(&format!(
        "<pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{}\" cy=\"{}\"/></a:xfrm>\
<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>",
        EMU_WIDTH, EMU_HEIGHT
    ));
    xml.push_str("</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>");
    xml
}

fn table_rows<R: MonthlyRecord>(table: &Table<R>) -> Vec<Vec<String>> {
    table
        .records
        .iter()
        .map(|record| {
            let mut row = vec![record.month().format("%Y-%m-%d").to_string()];
            for v in record.values() {
                row.push(if v.is_nan() { String::new() } else { v.to_string() });
            }
            row
        })
        .collect()
}

/// The insertion point for appended content: before the body's section
/// properties when present, otherwise right before the body close tag.
fn insert_into_body(document: &mut String, block: &str) -> Result<()> {
    let at = document
        .find("<w:sectPr")
        .or_else(|| document.rfind("</w:body>"))
        .ok_or_else(|| AuditError::Template("document has no <w:body>".to_string()))?;
    document.insert_str(at, block);
    Ok(())
}

struct ChartImage {
    file_name: String,
    rel_id: String,
    bytes: Vec<u8>,
    drawing: String,
}

/// Populates the report template with `context` and the two data tables,
/// then writes the finished package to `out_path`. All parts of the
/// template other than the document body, its relationships and the content
/// types are copied through untouched.
pub fn fill_document(
    template: impl AsRef<Path>,
    context: &DocumentContext,
    pnl: &PnlTable,
    cashflow: &CashflowTable,
    out_path: impl AsRef<Path>,
) -> Result<()> {
    let template = template.as_ref();
    let out_path = out_path.as_ref();
    if !template.exists() {
        return Err(AuditError::NotFound(template.to_path_buf()));
    }
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = fs::File::open(template)?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        AuditError::Template(format!(
            "{} is not a document package: {}",
            template.display(),
            e
        ))
    })?;

    let mut entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        entries.push((name, bytes));
    }

    let mut document = match entries.iter().position(|(n, _)| n == DOCUMENT_NAME) {
        Some(idx) => String::from_utf8_lossy(&entries[idx].1).into_owned(),
        None => {
            return Err(AuditError::Template(format!(
                "{} has no {} part",
                template.display(),
                DOCUMENT_NAME
            )))
        }
    };

    for (key, value) in [
        ("report_title", context.report_title.as_str()),
        ("report_date", context.report_date.as_str()),
        ("executive_summary", context.executive_summary.as_str()),
        ("conclusion", context.conclusion.as_str()),
    ] {
        let xml = placeholder_xml(value);
        document = document.replace(&format!("{{{{{}}}}}", key), &xml);
        document = document.replace(&format!("{{{{ {} }}}}", key), &xml);
    }

    let mut images: Vec<ChartImage> = Vec::new();
    for path in &context.images {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("skipping chart {}: {}", path.display(), e);
                continue;
            }
        };
        let n = images.len() + 1;
        let rel_id = format!("rIdChart{}", n);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("chart{}", n));
        images.push(ChartImage {
            file_name: format!("chart{}.png", n),
            rel_id: rel_id.clone(),
            bytes,
            drawing: drawing_xml(&rel_id, 9000 + n, &stem),
        });
    }

    let mut block = String::new();
    block.push_str(&docx_heading("Key Indicators"));
    let kpi_rows: Vec<Vec<String>> = context
        .kpis
        .iter()
        .map(|(name, value)| vec![name.to_string(), format_amount(value)])
        .collect();
    block.push_str(&docx_table(&["KPI", "Value"], &kpi_rows));
    block.push_str(&docx_heading("P&L"));
    block.push_str(&docx_table(PnlRecord::COLUMNS, &table_rows(pnl)));
    block.push_str(&docx_heading("Cashflow"));
    block.push_str(&docx_table(CashflowRecord::COLUMNS, &table_rows(cashflow)));
    if !images.is_empty() {
        block.push_str(&docx_heading("Charts"));
        for image in &images {
            block.push_str(&image.drawing);
        }
    }
    insert_into_body(&mut document, &block)?;

    let rels_index = entries.iter().position(|(n, _)| n == RELS_NAME);
    let mut rels = match rels_index {
        Some(idx) => String::from_utf8_lossy(&entries[idx].1).into_owned(),
        None => EMPTY_RELS.to_string(),
    };
    let mut content_types: Option<String> = None;

    if !images.is_empty() {
        let at = rels.rfind("</Relationships>").ok_or_else(|| {
            AuditError::Template("malformed document relationships part".to_string())
        })?;
        let mut additions = String::new();
        for image in &images {
            additions.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"media/{}\"/>",
                image.rel_id, IMAGE_REL_TYPE, image.file_name
            ));
        }
        rels.insert_str(at, &additions);

        let types_index = entries
            .iter()
            .position(|(n, _)| n == CONTENT_TYPES_NAME)
            .ok_or_else(|| {
                AuditError::Template(format!("package has no {}", CONTENT_TYPES_NAME))
            })?;
        let mut types = String::from_utf8_lossy(&entries[types_index].1).into_owned();
        if !types.contains("Extension=\"png\"") {
            let at = types.rfind("</Types>").ok_or_else(|| {
                AuditError::Template("malformed content types part".to_string())
            })?;
            types.insert_str(at, "<Default Extension=\"png\" ContentType=\"image/png\"/>");
        }
        content_types = Some(types);
    }

    let out_file = fs::File::create(out_path)?;
    let mut writer = ZipWriter::new(out_file);
    for (name, bytes) in &entries {
        let payload: &[u8] = match name.as_str() {
            DOCUMENT_NAME => document.as_bytes(),
            RELS_NAME if !images.is_empty() => rels.as_bytes(),
            CONTENT_TYPES_NAME => match &content_types {
                Some(types) => types.as_bytes(),
                None => bytes.as_slice(),
            },
            _ => bytes,
        };
        writer.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
        writer.write_all(payload)?;
    }
    if rels_index.is_none() && !images.is_empty() {
        writer.start_file::<_, ()>(RELS_NAME, FileOptions::default())?;
        writer.write_all(rels.as_bytes())?;
    }
    for image in &images {
        writer.start_file::<_, ()>(
            format!("word/media/{}", image.file_name),
            FileOptions::default(),
        )?;
        writer.write_all(&image.bytes)?;
    }
    writer.finish()?;

    debug!(
        "filled {} into {} ({} charts embedded)",
        template.display(),
        out_path.display(),
        images.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("P&L <2023>"), "P&amp;L &lt;2023&gt;");
        assert_eq!(xml_escape("\"quoted\""), "&quot;quoted&quot;");
        assert_eq!(xml_escape("plain"), "plain");
    }

    #[test]
    fn test_placeholder_xml_breaks_lines() {
        let xml = placeholder_xml("first\nsecond");
        assert!(xml.contains("first"));
        assert!(xml.contains("<w:br/>"));
        assert!(xml.contains("second"));
        assert_eq!(placeholder_xml("single"), "single");
    }

    #[test]
    fn test_docx_table_structure() {
        let rows = vec![vec!["2023-01-01".to_string(), "1000".to_string()]];
        let xml = docx_table(&["Month", "Revenue"], &rows);
        assert!(xml.starts_with("<w:tbl>"));
        assert!(xml.contains("<w:b/>"));
        assert!(xml.contains(">Month</w:t>"));
        assert!(xml.contains(">1000</w:t>"));
        assert_eq!(xml.matches("<w:tr>").count(), 2);
        assert_eq!(xml.matches("<w:gridCol").count(), 2);
    }

    #[test]
    fn test_drawing_references_relationship() {
        let xml = drawing_xml("rIdChart1", 9001, "waterfall");
        assert!(xml.contains("r:embed=\"rIdChart1\""));
        assert!(xml.contains("name=\"waterfall\""));
        assert!(xml.contains("<wp:inline"));
    }

    #[test]
    fn test_insert_into_body_prefers_sect_pr() {
        let mut document =
            "<w:document><w:body><w:p/><w:sectPr/></w:body></w:document>".to_string();
        insert_into_body(&mut document, "<w:tbl/>").unwrap();
        assert!(document.contains("<w:p/><w:tbl/><w:sectPr/>"));

        let mut bare = "<w:document><w:body><w:p/></w:body></w:document>".to_string();
        insert_into_body(&mut bare, "<w:tbl/>").unwrap();
        assert!(bare.contains("<w:p/><w:tbl/></w:body>"));

        let mut broken = "<nope/>".to_string();
        assert!(insert_into_body(&mut broken, "x").is_err());
    }
}
