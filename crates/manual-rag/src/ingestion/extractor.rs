//! Per-page text and image extraction

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};

/// Page-tree levels searched for inherited resources
const MAX_TREE_DEPTH: usize = 32;

/// Text of one document page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Extracted text
    pub text: String,
    /// Encoded images drawn on the page, in resource order
    pub images: Vec<Vec<u8>>,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Page-level text extraction
pub struct PageExtractor;

impl PageExtractor {
    /// Extract the text and up to `max_images` images of every page of a PDF.
    ///
    /// A page whose text cannot be decoded is returned empty rather than
    /// failing the document. CPU-bound; call from `spawn_blocking`.
    pub fn extract_pdf(filename: &str, data: &[u8], max_images: usize) -> Result<Vec<PageText>> {
        let doc = Document::load_mem(data)
            .map_err(|e| Error::file_parse(filename, format!("Failed to load PDF: {}", e)))?;

        if doc.is_encrypted() {
            return Err(Error::file_parse(filename, "PDF is encrypted"));
        }

        let pages = doc.get_pages();
        let mut result = Vec::with_capacity(pages.len());

        for (&page_number, &page_id) in &pages {
            let text = match doc.extract_text(&[page_number]) {
                Ok(text) => cleanup_page_text(&text),
                Err(e) => {
                    tracing::debug!("No text on page {} of {}: {}", page_number, filename, e);
                    String::new()
                }
            };
            let images = if max_images > 0 {
                page_images(&doc, page_id, max_images)
            } else {
                Vec::new()
            };
            result.push(PageText {
                page_number,
                text,
                images,
            });
        }

        tracing::debug!("Extracted {} pages from {}", result.len(), filename);
        Ok(result)
    }
}

/// Append visual annotations to a page's text.
///
/// Each note becomes a `[Visual Description: ...]` line so the answer prompt
/// can refer to diagrams by page.
pub fn append_visual_notes(text: &str, notes: &[String]) -> String {
    let mut out = text.trim_end().to_string();
    for note in notes.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("[Visual Description: ");
        out.push_str(note);
        out.push(']');
    }
    out
}

/// Follow a reference to the object it names
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// The page's resource dictionary, inherited from an ancestor if needed
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn stream_filters(stream: &Stream) -> Vec<&[u8]> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(items)) => items.iter().filter_map(|o| o.as_name().ok()).collect(),
        _ => Vec::new(),
    }
}

/// Image XObjects of a page whose stream is a complete JPEG file.
///
/// Other encodings hold raw samples with no file header and are skipped.
fn page_images(doc: &Document, page_id: ObjectId, limit: usize) -> Vec<Vec<u8>> {
    let Some(xobjects) = page_resources(doc, page_id)
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|xobjects| resolve(doc, xobjects))
        .and_then(|xobjects| xobjects.as_dict().ok())
    else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (name, object) in xobjects.iter() {
        let Some(stream) = resolve(doc, object).and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|subtype| subtype == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let filters = stream_filters(stream);
        if filters.len() == 1 && filters[0] == b"DCTDecode" {
            images.push(stream.content.clone());
        } else {
            tracing::debug!(
                "Skipping image {} with filters {:?}",
                String::from_utf8_lossy(name),
                filters
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).to_string())
                    .collect::<Vec<_>>()
            );
        }

        if images.len() == limit {
            break;
        }
    }
    images
}

/// Normalize whitespace and typographic characters
fn cleanup_page_text(text: &str) -> String {
    let normalized = text
        .replace('\u{00A0}', " ")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace("\r\n", "\n");

    normalized
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
