use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot parse {}: {detail}", .path.display())]
    Format { path: PathBuf, detail: String },

    #[error("Required column '{column}' missing from {}", .path.display())]
    Schema { path: PathBuf, column: String },

    #[error("Chart rendering error: {0}")]
    Chart(String),

    #[error("Document template error: {0}")]
    Template(String),

    #[error("Archive error: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
