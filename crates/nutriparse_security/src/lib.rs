//! Upload gatekeeper: static validation of uploaded documents.
//!
//! Checks run in a fixed order and fail fast. The malicious-content scan is
//! deliberately conservative: a false rejection is preferable to silently
//! accepting a booby-trapped document.

use nutriparse_protocol::ErrorKind;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

/// Window searched for the PDF magic at the head of the file.
const MAGIC_WINDOW: usize = 1024;
/// Window searched for the `%%EOF` marker at the tail of the file.
const EOF_WINDOW: usize = 1024;
const PDF_MAGIC: &[u8] = b"%PDF-";
const EOF_MARKER: &[u8] = b"%%EOF";
const MAX_FILENAME_LEN: usize = 255;

/// Tokens whose presence in the object graph marks a document as hostile.
/// `/EmbeddedFile` alone is tolerated unless an executable hint rides along.
const MALICIOUS_TOKENS: &[&[u8]] = &[b"/JS", b"/JavaScript", b"/Launch", b"/OpenAction"];
const EMBED_TOKEN: &[u8] = b"/EmbeddedFile";
const EXECUTABLE_HINTS: &[&[u8]] = &[
    b"application/x-msdownload",
    b"application/x-executable",
    b".exe",
    b".bat",
    b".cmd",
];

/// Size caps the validator enforces. The sync path carries a tighter cap.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_file_size: u64,
    /// When set, enforced in addition to `max_file_size` (sync parse path).
    pub max_sync_file_size: Option<u64>,
}

impl UploadLimits {
    pub fn asynchronous(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            max_sync_file_size: None,
        }
    }

    pub fn synchronous(max_file_size: u64, max_sync_file_size: u64) -> Self {
        Self {
            max_file_size,
            max_sync_file_size: Some(max_sync_file_size),
        }
    }
}

/// What the validator learned about an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub size_bytes: u64,
    pub mime: &'static str,
    pub page_count_hint: usize,
    pub sha256: String,
    pub sanitized_filename: String,
    /// Set when the trailing `%%EOF` marker was missing. Tolerant parsers
    /// accept truncated documents, so this is a warning, not a rejection.
    pub truncated: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ValidationError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Validate an upload. Checks, in order: size, extension, magic, structural
/// signature, malicious-content heuristics, filename.
pub fn validate(
    bytes: &[u8],
    filename: &str,
    limits: UploadLimits,
) -> Result<UploadInfo, ValidationError> {
    let size = bytes.len() as u64;
    if size == 0 {
        return Err(ValidationError::new(ErrorKind::Empty, "uploaded file is empty"));
    }
    if size > limits.max_file_size {
        return Err(ValidationError::new(
            ErrorKind::TooLarge,
            format!(
                "file is {} bytes, limit is {}",
                size, limits.max_file_size
            ),
        ));
    }
    if let Some(sync_cap) = limits.max_sync_file_size {
        if size > sync_cap {
            return Err(ValidationError::new(
                ErrorKind::TooLarge,
                format!(
                    "file is {} bytes, sync limit is {}; submit via /parse/async instead",
                    size, sync_cap
                ),
            ));
        }
    }

    let extension = filename.rsplit('.').next().unwrap_or("");
    if filename.find('.').is_none() || !extension.eq_ignore_ascii_case("pdf") {
        return Err(ValidationError::new(
            ErrorKind::WrongExtension,
            format!("only .pdf uploads are accepted, got '{}'", filename),
        ));
    }

    let head = &bytes[..bytes.len().min(MAGIC_WINDOW)];
    if find_token(head, PDF_MAGIC).is_none() {
        return Err(ValidationError::new(
            ErrorKind::NotPdf,
            "PDF magic not found in file head",
        ));
    }

    let tail_start = bytes.len().saturating_sub(EOF_WINDOW);
    let truncated = find_token(&bytes[tail_start..], EOF_MARKER).is_none();
    if truncated {
        warn!(filename, "upload is missing trailing %%EOF marker");
    }

    scan_for_malicious_content(bytes)?;

    let sanitized = sanitize_filename(filename);
    let sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    };
    // A name whose stem has no alphanumeric content is useless as a path
    // component; synthesize one from the content hash instead.
    let stem = sanitized.rsplit_once('.').map(|(s, _)| s).unwrap_or("");
    let sanitized_filename = if stem.chars().any(|c| c.is_alphanumeric()) {
        sanitized
    } else {
        format!("{}.pdf", &sha256[..16])
    };

    Ok(UploadInfo {
        size_bytes: size,
        mime: "application/pdf",
        page_count_hint: count_pages(bytes),
        sha256,
        sanitized_filename,
        truncated,
    })
}

/// Reject documents carrying active-content tokens.
fn scan_for_malicious_content(bytes: &[u8]) -> Result<(), ValidationError> {
    for token in MALICIOUS_TOKENS {
        if find_token(bytes, token).is_some() {
            return Err(ValidationError::new(
                ErrorKind::SuspectedMalicious,
                format!(
                    "document contains active-content token '{}'",
                    String::from_utf8_lossy(token)
                ),
            ));
        }
    }
    if find_token(bytes, EMBED_TOKEN).is_some() {
        for hint in EXECUTABLE_HINTS {
            if find_token(bytes, hint).is_some() {
                return Err(ValidationError::new(
                    ErrorKind::SuspectedMalicious,
                    "document embeds an executable attachment",
                ));
            }
        }
    }
    Ok(())
}

/// Sanitize a client-supplied filename: strip directory components, drop
/// control and reserved characters, cap the length preserving the extension.
/// Closed under itself: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    let mut cleaned = String::with_capacity(base.len());
    for ch in base.chars() {
        let keep = !ch.is_control() && !matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
        if keep {
            cleaned.push(ch);
        } else {
            cleaned.push('_');
        }
    }

    if cleaned.chars().count() <= MAX_FILENAME_LEN {
        return cleaned;
    }

    // Truncate the stem, keep the extension.
    match cleaned.rfind('.') {
        Some(dot) => {
            let (stem, ext) = cleaned.split_at(dot);
            let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
            let stem: String = stem.chars().take(keep).collect();
            format!("{}{}", stem, ext)
        }
        None => cleaned.chars().take(MAX_FILENAME_LEN).collect(),
    }
}

/// Cheap page-count hint: count page object markers. Zero means unknown.
fn count_pages(bytes: &[u8]) -> usize {
    let mut count = 0;
    let mut offset = 0;
    while let Some(pos) = find_token(&bytes[offset..], b"/Type /Page") {
        let after = offset + pos + b"/Type /Page".len();
        // "/Type /Pages" is the page tree root, not a page.
        if bytes.get(after) != Some(&b's') {
            count += 1;
        }
        offset = after;
    }
    if count == 0 {
        let mut offset = 0;
        while let Some(pos) = find_token(&bytes[offset..], b"/Type/Page") {
            let after = offset + pos + b"/Type/Page".len();
            if bytes.get(after) != Some(&b's') {
                count += 1;
            }
            offset = after;
        }
    }
    count
}

fn find_token(haystack: &[u8], needle: &[u8]) -> Option<usize> {
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

    fn pdf(body: &str) -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(body.as_bytes());
        bytes.extend_from_slice(b"\n%%EOF\n");
        bytes
    }

    fn limits() -> UploadLimits {
        UploadLimits::asynchronous(1024 * 1024)
    }

    #[test]
    fn accepts_well_formed_pdf() {
        let bytes = pdf("/Type /Page\nNutrition Facts");
        let info = validate(&bytes, "label.pdf", limits()).expect("valid");
        assert_eq!(info.mime, "application/pdf");
        assert_eq!(info.page_count_hint, 1);
        assert!(!info.truncated);
        assert_eq!(info.sanitized_filename, "label.pdf");
    }

    #[test]
    fn rejects_empty() {
        let err = validate(b"", "a.pdf", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Empty);
    }

    #[test]
    fn rejects_oversize() {
        let bytes = vec![0u8; 64];
        let err = validate(
            &bytes,
            "a.pdf",
            UploadLimits::asynchronous(32),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooLarge);
    }

    #[test]
    fn sync_cap_recommends_async() {
        let bytes = pdf("content");
        let err = validate(
            &bytes,
            "a.pdf",
            UploadLimits::synchronous(1024 * 1024, 4),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooLarge);
        assert!(err.message.contains("/parse/async"));
    }

    #[test]
    fn rejects_wrong_extension() {
        let bytes = pdf("content");
        let err = validate(&bytes, "a.docx", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WrongExtension);
        let err = validate(&bytes, "noext", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WrongExtension);
    }

    #[test]
    fn rejects_missing_magic() {
        let err = validate(b"plain text, no magic", "a.pdf", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotPdf);
    }

    #[test]
    fn missing_eof_is_tolerated_with_warning() {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(b"truncated body");
        let info = validate(&bytes, "a.pdf", limits()).expect("accepted");
        assert!(info.truncated);
    }

    #[test]
    fn rejects_javascript_payload() {
        let bytes = pdf("/JS (app.alert(1))");
        let err = validate(&bytes, "a.pdf", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SuspectedMalicious);
    }

    #[test]
    fn rejects_launch_action() {
        let bytes = pdf("/Launch << /F (cmd.exe) >>");
        let err = validate(&bytes, "a.pdf", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SuspectedMalicious);
    }

    #[test]
    fn embedded_file_alone_is_allowed() {
        let bytes = pdf("/EmbeddedFile << /Subtype /image#2Fpng >>");
        assert!(validate(&bytes, "a.pdf", limits()).is_ok());
    }

    #[test]
    fn embedded_executable_is_rejected() {
        let bytes = pdf("/EmbeddedFile << /Subtype /application/x-msdownload >>");
        let err = validate(&bytes, "a.pdf", limits()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SuspectedMalicious);
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(sanitize_filename("C:\\temp\\a.pdf"), "a.pdf");
    }

    #[test]
    fn sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize_filename("a<b>:c.pdf"), "a_b__c.pdf");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in ["../x/y?.pdf", "weird\u{1}name.pdf", "plain.pdf"] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once);
        }
    }

    #[test]
    fn meaningless_filename_synthesized_from_hash() {
        let bytes = pdf("content");
        let info = validate(&bytes, "....pdf", limits()).expect("accepted");
        assert!(info.sanitized_filename.ends_with(".pdf"));
        let stem = info.sanitized_filename.trim_end_matches(".pdf");
        assert_eq!(stem, &info.sha256[..16]);
    }

    #[test]
    fn page_count_hint_counts_pages_not_tree() {
        let bytes = pdf("/Type /Pages\n/Type /Page\n/Type /Page");
        let info = validate(&bytes, "a.pdf", limits()).expect("valid");
        assert_eq!(info.page_count_hint, 2);
    }
}
