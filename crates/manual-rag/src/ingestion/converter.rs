//! DOCX conversion: LibreOffice to PDF, with a plain-text fallback

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};

use super::extractor::PageText;

/// Result of converting a DOCX upload
#[derive(Debug)]
pub enum Converted {
    /// The document as a PDF, ready for page extraction
    Pdf(Vec<u8>),
    /// Paragraph text only, indexed as a single page
    Text(Vec<PageText>),
}

/// Converts DOCX documents so they can be indexed page by page
pub struct DocxConverter {
    binary: String,
    timeout: Duration,
    text_fallback: bool,
}

impl DocxConverter {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            binary: config.libreoffice_binary.clone(),
            timeout: Duration::from_secs(config.conversion_timeout_secs),
            text_fallback: config.docx_text_fallback,
        }
    }

    /// Convert a DOCX document, preferring a real PDF so page numbers survive
    pub async fn convert(&self, filename: &str, data: &[u8]) -> Result<Converted> {
        match self.convert_with_libreoffice(filename, data).await {
            Ok(pdf) => {
                tracing::info!("Converted {} to PDF ({} bytes)", filename, pdf.len());
                Ok(Converted::Pdf(pdf))
            }
            Err(e) if self.text_fallback => {
                tracing::warn!(
                    "LibreOffice conversion of {} failed, indexing text as one page: {}",
                    filename,
                    e
                );
                let text = extract_docx_text(filename, data)?;
                Ok(Converted::Text(vec![PageText::new(1, text)]))
            }
            Err(e) => Err(e),
        }
    }

    /// Run `soffice --headless --convert-to pdf` in a scratch directory
    async fn convert_with_libreoffice(&self, filename: &str, data: &[u8]) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join(filename);
        tokio::fs::write(&input_path, data).await?;

        let child = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input_path)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::file_parse(
                    filename,
                    format!("LibreOffice timed out after {:?}", self.timeout),
                )
            })?
            .map_err(|e| Error::file_parse(filename, format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::file_parse(
                filename,
                format!("LibreOffice error: {}", stderr.trim()),
            ));
        }

        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let output_path = scratch.path().join(format!("{}.pdf", stem));

        tokio::fs::read(&output_path).await.map_err(|e| {
            Error::file_parse(filename, format!("Converted PDF not found: {}", e))
        })
    }
}

/// Paragraph text of a DOCX document, one line per paragraph
pub fn extract_docx_text(filename: &str, data: &[u8]) -> Result<String> {
    let doc = docx_rs::read_docx(data).map_err(|e| Error::file_parse(filename, e.to_string()))?;

    let mut text = String::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            text.push('\n');
        }
    }

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::file_parse(filename, "Document contains no text"));
    }
    Ok(text)
}
