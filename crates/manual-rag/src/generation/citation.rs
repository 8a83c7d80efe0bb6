//! Citation extraction from generated answers

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::types::{AssembledContext, PageCitation};

/// Matches `[Page 4]` and `[Page 4, 7]` (also `[Pages 4, 7]`)
const PAGE_MARKER: &str = r"\[Pages?\s+(\d+(?:\s*,\s*\d+)*)\s*\]";

fn page_marker() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(PAGE_MARKER))
        .as_ref()
        .map_err(|e| Error::internal(format!("Invalid page marker pattern: {}", e)))
}

/// Extract the page citations in `answer` that refer to pages of `context`.
///
/// Citations are returned in order of first appearance, deduplicated.
/// Pages the context does not contain are dropped.
pub fn extract_page_citations(answer: &str, context: &AssembledContext) -> Result<Vec<PageCitation>> {
    let pattern = page_marker()?;
    let mut citations: Vec<PageCitation> = Vec::new();

    for cap in pattern.captures_iter(answer) {
        let Some(list) = cap.get(1) else { continue };

        for page in list.as_str().split(',').filter_map(|p| p.trim().parse::<u32>().ok()) {
            if citations.iter().any(|c| c.page_number == page) {
                continue;
            }

            match context.passages().iter().find(|p| p.page_number == page) {
                Some(passage) => citations.push(PageCitation {
                    page_number: page,
                    source_id: passage.source_id.clone(),
                }),
                None => tracing::debug!("Dropping citation of page {} not in context", page),
            }
        }
    }

    Ok(citations)
}
