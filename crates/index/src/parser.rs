//! Book file parsing and text extraction.

use encoding_rs::WINDOWS_1251;
use libris_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Characters inspected when deciding whether a windows-1251 decode is right.
const ENCODING_PREVIEW_CHARS: usize = 100;

pub const DEFAULT_MAX_PDF_PAGES: usize = 1000;

/// Tags that end a line of running text.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "title", "section",
    "subtitle", "v", "stanza", "empty-line", "epigraph", "cite",
];

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    PlainText,
    Markdown,
    Html,
    FictionBook,
    Pdf,
    Epub,
}

impl SourceFormat {
    /// Detect format from file extension. `None` means the file is not a book.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "fb2" => Some(Self::FictionBook),
            "pdf" => Some(Self::Pdf),
            "epub" => Some(Self::Epub),
            _ => None,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::FictionBook => "fb2",
            Self::Pdf => "pdf",
            Self::Epub => "epub",
        }
    }
}

/// Limits applied before a book is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_bytes: u64,
    pub max_pdf_pages: usize,
}

impl ParseLimits {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_pdf_pages: DEFAULT_MAX_PDF_PAGES,
        }
    }
}

/// Parse a book file and extract normalized text.
///
/// Files larger than `limits.max_bytes` are rejected before they are read,
/// PDFs with more than `limits.max_pdf_pages` pages before any text is
/// extracted.
pub fn parse_file(path: &Path, limits: &ParseLimits) -> AppResult<String> {
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| AppError::source_read(path, "unsupported file format"))?;

    let size = fs::metadata(path)
        .map_err(|e| AppError::source_read(path, e.to_string()))?
        .len();
    if size > limits.max_bytes {
        return Err(AppError::source_read(
            path,
            format!("file is {} bytes, limit is {} bytes", size, limits.max_bytes),
        ));
    }

    let extracted = match format {
        SourceFormat::Pdf => extract_pdf(path, limits.max_pdf_pages)?,
        SourceFormat::Epub => extract_epub(path)?,
        _ => {
            let bytes = fs::read(path).map_err(|e| AppError::source_read(path, e.to_string()))?;
            let raw = decode_text(path, &bytes);
            match format {
                SourceFormat::Markdown => clean_markdown(&raw),
                SourceFormat::Html => strip_markup(&raw),
                SourceFormat::FictionBook => extract_fb2_body(&raw),
                _ => raw,
            }
        }
    };

    Ok(normalize_text(&extracted))
}

/// Decode file bytes.
///
/// UTF-8 (with or without BOM) first, then windows-1251 when the result
/// looks like Cyrillic text, and lossy UTF-8 as the last resort.
fn decode_text(path: &Path, bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let err = match std::str::from_utf8(bytes) {
        Ok(text) => return text.to_string(),
        Err(e) => e,
    };

    let (cp1251, _) = WINDOWS_1251.decode_without_bom_handling(bytes);
    if looks_cyrillic(&cp1251) {
        tracing::debug!("{:?} decoded as windows-1251", path);
        return cp1251.into_owned();
    }

    tracing::warn!(
        "{:?} is neither UTF-8 (bad byte at {}) nor Cyrillic windows-1251, decoding lossily",
        path,
        err.valid_up_to()
    );
    String::from_utf8_lossy(bytes).into_owned()
}

/// Short texts pass; longer ones need Cyrillic letters near the start.
fn looks_cyrillic(text: &str) -> bool {
    let preview: Vec<char> = text.chars().take(ENCODING_PREVIEW_CHARS).collect();
    preview.len() <= 10 || preview.iter().any(|c| ('\u{0400}'..='\u{04FF}').contains(c))
}

/// Extract page text from a PDF, skipping pages without a text layer.
fn extract_pdf(path: &Path, max_pages: usize) -> AppResult<String> {
    let document = lopdf::Document::load(path)
        .map_err(|e| AppError::source_read(path, format!("cannot open PDF: {}", e)))?;

    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.len() > max_pages {
        return Err(AppError::source_read(
            path,
            format!("PDF has {} pages, limit is {}", pages.len(), max_pages),
        ));
    }

    let mut parts = Vec::with_capacity(pages.len());
    for page in &pages {
        match document.extract_text(&[*page]) {
            Ok(text) if !text.trim().is_empty() => parts.push(text),
            Ok(_) => {}
            Err(e) => tracing::warn!("{:?}: no text on page {}: {}", path, page, e),
        }
    }

    tracing::debug!("Extracted {} of {} PDF pages from {:?}", parts.len(), pages.len(), path);
    Ok(parts.join("\n\n"))
}

/// Extract the XHTML documents of an EPUB in spine order.
fn extract_epub(path: &Path) -> AppResult<String> {
    let mut book = epub::doc::EpubDoc::new(path)
        .map_err(|e| AppError::source_read(path, format!("cannot open EPUB: {}", e)))?;

    let mut parts = Vec::new();
    loop {
        if let Some((content, mime)) = book.get_current_str() {
            if mime.contains("html") {
                let text = strip_markup(&content);
                if !text.trim().is_empty() {
                    parts.push(text);
                }
            }
        }
        if !book.go_next() {
            break;
        }
    }

    Ok(parts.join("\n\n"))
}

/// Normalize extracted text.
///
/// Removes NUL characters, unifies line endings, collapses whitespace within
/// lines and limits blank runs to a single empty line.
pub fn normalize_text(text: &str) -> String {
    let cleaned = text.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");

    let mut result = String::with_capacity(cleaned.len());
    let mut blank_run = 0usize;

    for line in cleaned.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }

        if !result.is_empty() {
            result.push('\n');
            if blank_run > 0 {
                result.push('\n');
            }
        }
        result.push_str(&collapsed);
        blank_run = 0;
    }

    result
}

/// Clean markdown by removing structural markup.
fn clean_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim();

        // Skip horizontal rules and code fences
        if trimmed.starts_with("---") || trimmed.starts_with("```") || trimmed.starts_with("~~~")
        {
            continue;
        }

        let content = trimmed
            .trim_start_matches('#')
            .trim_start_matches('>')
            .trim();
        result.push_str(content);
        result.push('\n');
    }

    result
}

/// Keep only the `<body>` sections of a FictionBook document.
fn extract_fb2_body(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut bodies = String::new();
    let mut cursor = 0;

    while let Some(open) = lower[cursor..].find("<body") {
        let open = cursor + open;
        let Some(close) = lower[open..].find("</body>") else {
            bodies.push_str(&text[open..]);
            break;
        };
        let close = open + close + "</body>".len();
        bodies.push_str(&text[open..close]);
        bodies.push('\n');
        cursor = close;
    }

    if bodies.is_empty() {
        // Not a well-formed FictionBook; take whatever text there is
        return strip_markup(text);
    }

    strip_markup(&bodies)
}

/// Strip XML/HTML tags, dropping script and style contents.
///
/// Block-level tags become line breaks so paragraphs survive normalization.
fn strip_markup(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut rest = 0;

    while let Some(offset) = text[rest..].find('<') {
        let open = rest + offset;
        result.push_str(&text[rest..open]);

        let Some(close) = text[open..].find('>') else {
            // Unterminated tag, keep the tail as text
            result.push_str(&text[open..]);
            rest = text.len();
            break;
        };
        let close = open + close;
        let tag = &lower[open + 1..close];
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        rest = close + 1;

        if (name == "script" || name == "style") && !tag.starts_with('/') {
            let end_tag = format!("</{}", name);
            match lower[rest..].find(&end_tag) {
                Some(end) => {
                    let end = rest + end;
                    rest = lower[end..].find('>').map(|i| end + i + 1).unwrap_or(text.len());
                }
                None => rest = text.len(),
            }
            continue;
        }

        if BLOCK_TAGS.contains(&name) && !result.ends_with('\n') {
            result.push('\n');
        }
    }

    if rest < text.len() {
        result.push_str(&text[rest..]);
    }

    decode_entities(&result)
}

/// Decode the common named and numeric character references.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                "mdash" => Some('\u{2014}'),
                "ndash" => Some('\u{2013}'),
                "laquo" => Some('\u{00AB}'),
                "raquo" => Some('\u{00BB}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });

        match decoded {
            Some((ch, semi)) => {
                result.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                result.push('&');
                rest = &tail[1..];
            }
        }
    }

    result.push_str(rest);
    result
}
