//! Upload security check: extension allow-list plus content sniffing

use std::path::Path;

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Document formats accepted for ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// Validates uploaded files before anything touches their contents
pub struct FileValidator;

impl FileValidator {
    /// Accept `.pdf` and `.docx` files whose bytes match the extension
    pub fn validate(filename: &str, data: &[u8]) -> Result<DocumentKind> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let kind = match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            "" => {
                return Err(Error::UnsupportedFileType(format!(
                    "'{}' has no file extension; only .pdf and .docx are accepted",
                    filename
                )))
            }
            other => {
                return Err(Error::UnsupportedFileType(format!(
                    ".{} files are not accepted; only .pdf and .docx",
                    other
                )))
            }
        };

        let magic = match kind {
            DocumentKind::Pdf => PDF_MAGIC,
            DocumentKind::Docx => ZIP_MAGIC,
        };
        if !data.starts_with(magic) {
            return Err(Error::UnsupportedFileType(format!(
                "'{}' content does not look like a .{} file",
                filename,
                kind.extension()
            )));
        }

        Ok(kind)
    }

    /// Reduce a client-supplied name to a safe file name
    pub fn sanitize_filename(name: &str) -> String {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let cleaned: String = base
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim().trim_start_matches('.').to_string();

        if cleaned.is_empty() {
            "upload".to_string()
        } else {
            cleaned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_pdf_and_docx() {
        assert_eq!(
            FileValidator::validate("Manual.PDF", b"%PDF-1.7\n...").unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            FileValidator::validate("guide.docx", b"PK\x03\x04rest").unwrap(),
            DocumentKind::Docx
        );
    }

    #[test]
    fn test_rejects_other_extensions() {
        let err = FileValidator::validate("notes.txt", b"hello").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
        assert!(FileValidator::validate("noext", b"%PDF-").is_err());
    }

    #[test]
    fn test_rejects_mismatched_content() {
        assert!(FileValidator::validate("fake.pdf", b"PK\x03\x04").is_err());
        assert!(FileValidator::validate("fake.docx", b"%PDF-1.4").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(FileValidator::sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(FileValidator::sanitize_filename("C:\\docs\\pump manual.pdf"), "pump manual.pdf");
        assert_eq!(FileValidator::sanitize_filename("..."), "upload");
        assert_eq!(FileValidator::sanitize_filename("a$b.pdf"), "a_b.pdf");
    }
}
