//! Text extraction seams.
//!
//! The real PDF-to-text and OCR libraries are external collaborators; the
//! pipeline only sees these traits. `PlainTextExtractor` is the shipped
//! default: it pulls literal text strings out of uncompressed PDF content,
//! which covers label-style documents and every test fixture. Embedders
//! with compressed or scanned inputs plug real engines in.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document is not parseable as PDF: {0}")]
    Unparseable(String),
    #[error("unsupported PDF variant: {0}")]
    UnsupportedVariant(String),
}

/// Text layer of a document, one entry per page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
}

impl ExtractedText {
    pub fn full_text(&self) -> String {
        self.pages.join("\n")
    }

    pub fn page_count(&self) -> usize {
        self.pages.len().max(1)
    }

    /// Average characters per page; the OCR-fallback trigger.
    pub fn avg_chars_per_page(&self) -> usize {
        let total: usize = self.pages.iter().map(|p| p.chars().count()).sum();
        total / self.page_count()
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError>;
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr is disabled")]
    Disabled,
    #[error("transient ocr failure: {0}")]
    Transient(String),
    #[error("ocr failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Engine-reported recognition confidence in 0..1.
    pub confidence: f64,
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, bytes: &[u8], languages: &[String]) -> Result<OcrOutput, OcrError>;
}

/// Default when `parser.ocr_enabled = false` or no engine is wired in.
#[derive(Debug, Default)]
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _bytes: &[u8], _languages: &[String]) -> Result<OcrOutput, OcrError> {
        Err(OcrError::Disabled)
    }
}

const PAGE_MARKERS: [&[u8]; 2] = [b"/Type /Page", b"/Type/Page"];

/// Extracts PDF literal strings (`(...)` show-text operands) from
/// uncompressed content, grouped per page object.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        if !bytes.starts_with(b"%PDF-") && find(bytes, b"%PDF-").is_none() {
            return Err(ExtractError::Unparseable("missing PDF magic".to_string()));
        }

        let mut boundaries = page_boundaries(bytes);
        if boundaries.is_empty() {
            boundaries.push(0);
        }

        let mut pages = Vec::with_capacity(boundaries.len());
        for (idx, start) in boundaries.iter().enumerate() {
            let end = boundaries.get(idx + 1).copied().unwrap_or(bytes.len());
            pages.push(literal_strings(&bytes[*start..end]));
        }

        // Leading catalog text (before the first page object) belongs to
        // page one.
        if boundaries[0] > 0 {
            let preamble = literal_strings(&bytes[..boundaries[0]]);
            if !preamble.is_empty() {
                if let Some(first) = pages.first_mut() {
                    if first.is_empty() {
                        *first = preamble;
                    } else {
                        *first = format!("{}\n{}", preamble, first);
                    }
                }
            }
        }

        Ok(ExtractedText { pages })
    }
}

fn page_boundaries(bytes: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    for marker in PAGE_MARKERS {
        let mut from = 0;
        while let Some(pos) = find(&bytes[from..], marker) {
            let at = from + pos;
            // Skip the page tree root (/Type /Pages).
            if bytes.get(at + marker.len()) != Some(&b's') {
                offsets.push(at);
            }
            from = at + marker.len();
        }
    }
    offsets.sort_unstable();
    offsets
}

/// Collect the contents of balanced `(...)` groups, handling the PDF
/// escapes `\(`, `\)` and `\\`. Each group becomes one line.
fn literal_strings(bytes: &[u8]) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    let mut escaped = false;

    for &byte in bytes {
        if depth == 0 {
            if byte == b'(' {
                depth = 1;
                current.clear();
            }
            continue;
        }
        if escaped {
            current.push(byte);
            escaped = false;
            continue;
        }
        match byte {
            b'\\' => escaped = true,
            b'(' => {
                depth += 1;
                current.push(byte);
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    let text = String::from_utf8_lossy(&current).into_owned();
                    if !text.trim().is_empty() {
                        out.push(text);
                    }
                } else {
                    current.push(byte);
                }
            }
            _ => current.push(byte),
        }
    }

    out.join("\n")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_literal_strings() {
        let pdf = b"%PDF-1.4\n/Type /Page\nBT (Nutrition Facts) Tj (Calories 250) Tj ET\n%%EOF";
        let text = PlainTextExtractor::new().extract(pdf).expect("extract");
        assert_eq!(text.pages.len(), 1);
        assert!(text.full_text().contains("Nutrition Facts"));
        assert!(text.full_text().contains("Calories 250"));
    }

    #[test]
    fn splits_pages_on_page_objects() {
        let pdf = b"%PDF-1.4\n/Type /Page\n(first page)\n/Type /Page\n(second page)\n%%EOF";
        let text = PlainTextExtractor::new().extract(pdf).expect("extract");
        assert_eq!(text.pages.len(), 2);
        assert!(text.pages[0].contains("first page"));
        assert!(text.pages[1].contains("second page"));
    }

    #[test]
    fn handles_escaped_parens() {
        let pdf = b"%PDF-1.4\n/Type /Page\n(a \\(b\\) c)\n%%EOF";
        let text = PlainTextExtractor::new().extract(pdf).expect("extract");
        assert_eq!(text.pages[0], "a (b) c");
    }

    #[test]
    fn page_tree_root_is_not_a_page() {
        let pdf = b"%PDF-1.4\n/Type /Pages\n/Type /Page\n(only page)\n%%EOF";
        let text = PlainTextExtractor::new().extract(pdf).expect("extract");
        assert_eq!(text.pages.len(), 1);
    }

    #[test]
    fn rejects_non_pdf() {
        let err = PlainTextExtractor::new().extract(b"hello world").unwrap_err();
        assert!(matches!(err, ExtractError::Unparseable(_)));
    }

    #[test]
    fn avg_chars_per_page_never_divides_by_zero() {
        let empty = ExtractedText { pages: vec![] };
        assert_eq!(empty.avg_chars_per_page(), 0);
    }
}
