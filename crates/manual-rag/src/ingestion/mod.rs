//! Document ingestion: PDF and DOCX manuals to page-level passages

mod converter;
mod extractor;
mod processor;
mod validator;

pub use converter::{extract_docx_text, Converted, DocxConverter};
pub use extractor::{append_visual_notes, PageExtractor, PageText};
pub use processor::IngestPipeline;
pub use validator::{DocumentKind, FileValidator};
