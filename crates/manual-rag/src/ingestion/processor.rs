//! Ingestion pipeline: validate, convert, extract, describe, embed and insert

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::{SimilarityIndex, VisionProvider};
use crate::types::{PassageRecord, UploadResponse};

use super::converter::{Converted, DocxConverter};
use super::extractor::{append_visual_notes, PageExtractor, PageText};
use super::validator::{DocumentKind, FileValidator};

/// Note recorded for an image the vision model could not describe
pub const IMAGE_ANALYSIS_FAILED: &str = "Image analysis failed.";

/// Turns uploaded manuals into page-level passages in the similarity index
pub struct IngestPipeline {
    index: Arc<dyn SimilarityIndex>,
    /// Describes page images; `None` indexes text only
    vision: Option<Arc<dyn VisionProvider>>,
    converter: DocxConverter,
    max_images_per_page: usize,
    /// Where indexed PDFs are kept for download
    upload_dir: PathBuf,
}

impl IngestPipeline {
    pub fn new(
        index: Arc<dyn SimilarityIndex>,
        vision: Option<Arc<dyn VisionProvider>>,
        config: &RagConfig,
    ) -> Self {
        let max_images_per_page = if vision.is_some() {
            config.ingestion.max_images_per_page
        } else {
            0
        };

        Self {
            index,
            vision,
            converter: DocxConverter::new(&config.ingestion),
            max_images_per_page,
            upload_dir: config.server.upload_dir.clone(),
        }
    }

    /// Ingest one uploaded file.
    ///
    /// Pages with no text are skipped; the upload fails only if no page at
    /// all could be indexed.
    pub async fn ingest(&self, original_name: &str, data: Vec<u8>) -> Result<UploadResponse> {
        let safe_name = FileValidator::sanitize_filename(original_name);
        let kind = FileValidator::validate(&safe_name, &data)?;

        tracing::info!(
            "Ingesting {} ({:?}, {} bytes)",
            safe_name,
            kind,
            data.len()
        );

        // The PDF copy is kept only once its pages are in the index
        let (filename, pages, pdf) = match kind {
            DocumentKind::Pdf => {
                let pages = self.extract_pdf_pages(&safe_name, data.clone()).await?;
                (safe_name.clone(), pages, Some(data))
            }
            DocumentKind::Docx => match self.converter.convert(&safe_name, &data).await? {
                Converted::Pdf(pdf) => {
                    let pdf_name = with_pdf_extension(&safe_name);
                    let pages = self.extract_pdf_pages(&pdf_name, pdf.clone()).await?;
                    (pdf_name, pages, Some(pdf))
                }
                Converted::Text(pages) => (safe_name.clone(), pages, None),
            },
        };

        let pages = self.describe_images(&filename, pages).await;

        let total_pages = pages.len();
        let records: Vec<PassageRecord> = pages
            .into_iter()
            .map(|page| PassageRecord::new(filename.clone(), page.page_number, page.text))
            .filter(PassageRecord::is_valid)
            .collect();

        if records.is_empty() {
            return Err(Error::Ingestion(format!(
                "'{}' has no extractable text on any of its {} pages",
                filename, total_pages
            )));
        }

        let inserted = self.index.insert(records).await?;
        let skipped = total_pages.saturating_sub(inserted);

        if let Some(pdf) = pdf {
            self.store(&filename, &pdf).await;
        }

        tracing::info!(
            "Indexed {} of {} pages from {} ({} skipped)",
            inserted,
            total_pages,
            filename,
            skipped
        );

        Ok(UploadResponse {
            status: "success".to_string(),
            filename,
            original_name: original_name.to_string(),
            pages_indexed: inserted,
            pages_skipped: skipped,
        })
    }

    /// Path of a stored document, if the name is safe and the file exists
    pub fn stored_path(&self, filename: &str) -> Option<PathBuf> {
        if FileValidator::sanitize_filename(filename) != filename {
            return None;
        }
        let path = self.upload_dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Append a `[Visual Description: ...]` note per image to its page.
    ///
    /// Images are described one at a time; a failed description becomes the
    /// fixed fallback note and never fails the page.
    async fn describe_images(&self, filename: &str, mut pages: Vec<PageText>) -> Vec<PageText> {
        let Some(vision) = &self.vision else {
            return pages;
        };

        for page in pages.iter_mut().filter(|p| !p.images.is_empty()) {
            tracing::info!(
                "Page {} of {}: describing {} image(s) with {}",
                page.page_number,
                filename,
                page.images.len(),
                vision.name()
            );

            let mut notes = Vec::with_capacity(page.images.len());
            for (i, image) in std::mem::take(&mut page.images).iter().enumerate() {
                match vision.describe_image(image).await {
                    Ok(description) => notes.push(description),
                    Err(e) => {
                        tracing::warn!(
                            "Image {} on page {} of {} could not be described: {}",
                            i + 1,
                            page.page_number,
                            filename,
                            e
                        );
                        notes.push(IMAGE_ANALYSIS_FAILED.to_string());
                    }
                }
            }
            page.text = append_visual_notes(&page.text, &notes);
        }
        pages
    }

    async fn extract_pdf_pages(&self, filename: &str, data: Vec<u8>) -> Result<Vec<PageText>> {
        let name = filename.to_string();
        let max_images = self.max_images_per_page;
        tokio::task::spawn_blocking(move || PageExtractor::extract_pdf(&name, &data, max_images))
            .await
            .map_err(|e| Error::internal(format!("PDF extraction task failed: {}", e)))?
    }

    /// Keep a copy of the indexed PDF; failure only costs the download link
    async fn store(&self, filename: &str, data: &[u8]) {
        if let Err(e) = write_file(&self.upload_dir, filename, data).await {
            tracing::warn!("Could not store {} in {:?}: {}", filename, self.upload_dir, e);
        }
    }
}

async fn write_file(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(filename), data).await
}

fn with_pdf_extension(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    format!("{}.pdf", stem)
}
