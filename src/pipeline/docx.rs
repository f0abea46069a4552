//! Plain-text extraction from OOXML word-processing files (`.docx`).
//!
//! A `.docx` is a zip container whose body lives in `word/document.xml`.
//! Only the visible text runs matter for a canvas render, so instead of a
//! full XML parser this walks the few WordprocessingML elements that carry
//! text or line structure, in document order:
//!
//! | Element | Meaning | Output |
//! |---------|---------|--------|
//! | `<w:t>…</w:t>` | text run | its (unescaped) content |
//! | `<w:tab/>` | tab | a space |
//! | `<w:br/>`, `<w:cr/>` | line break | `\n` |
//! | `</w:p>` | end of paragraph | `\n` |

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read};

const DOCUMENT_PART: &str = "word/document.xml";

/// Upper bound on the decompressed body part. Only a page of text is ever
/// drawn, so anything near this size is a zip bomb rather than a letter.
pub const MAX_DOCUMENT_XML_BYTES: u64 = 64 * 1024 * 1024;

static RE_TEXT_STRUCTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:t(?:\s[^>]*)?/>|</w:p>|<w:(?:br|cr)(?:\s[^>]*)?/>|<w:tab(?:\s[^>]*)?/>")
        .unwrap()
});

static RE_CHAR_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").unwrap());

/// Extract the body text of a `.docx` held in memory.
pub fn extract_text(bytes: &[u8]) -> Result<String, String> {
    extract_text_with_limit(bytes, MAX_DOCUMENT_XML_BYTES)
}

/// Like [`extract_text`], failing once the body part inflates past `limit` bytes.
pub fn extract_text_with_limit(bytes: &[u8], limit: u64) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("not a valid OOXML container: {e}"))?;

    let part = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| format!("missing {DOCUMENT_PART}: {e}"))?;

    let mut xml = Vec::new();
    part.take(limit.saturating_add(1))
        .read_to_end(&mut xml)
        .map_err(|e| format!("cannot read {DOCUMENT_PART}: {e}"))?;
    if xml.len() as u64 > limit {
        return Err(format!("{DOCUMENT_PART} expands beyond {limit} bytes"));
    }

    let xml = String::from_utf8(xml).map_err(|e| format!("{DOCUMENT_PART} is not UTF-8: {e}"))?;
    Ok(text_from_document_xml(&xml))
}

fn text_from_document_xml(xml: &str) -> String {
    let mut text = String::with_capacity(xml.len() / 4);

    for caps in RE_TEXT_STRUCTURE.captures_iter(xml) {
        if let Some(run) = caps.get(1) {
            text.push_str(&unescape_xml(run.as_str()));
            continue;
        }
        let tag = caps.get(0).map_or("", |m| m.as_str());
        if tag.starts_with("<w:tab") {
            text.push(' ');
        } else if tag.starts_with("</w:p") || tag.starts_with("<w:br") || tag.starts_with("<w:cr") {
            text.push('\n');
        }
    }

    text.trim_end().to_string()
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let s = RE_CHAR_REF.replace_all(s, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a minimal `.docx` whose body is `body_xml`.
    pub(crate) fn build_docx(body_xml: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("[Content_Types].xml", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Types/>"#).unwrap();
            zip.start_file(DOCUMENT_PART, SimpleFileOptions::default())
                .unwrap();
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body_xml}</w:body></w:document>"#
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn extracts_paragraphs_in_order() {
        let docx = build_docx(
            r#"<w:p><w:r><w:t>Dear Anna,</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">We reached </w:t></w:r><w:r><w:t>Narvik.</w:t></w:r></w:p>"#,
        );
        let text = extract_text(&docx).unwrap();
        assert_eq!(text, "Dear Anna,\nWe reached Narvik.");
    }

    #[test]
    fn handles_breaks_tabs_and_entities() {
        let docx = build_docx(
            r#"<w:p><w:r><w:t>A &amp; B</w:t><w:tab/><w:t>&lt;C&gt;</w:t><w:br/><w:t>caf&#233;</w:t></w:r></w:p>"#,
        );
        let text = extract_text(&docx).unwrap();
        assert_eq!(text, "A & B <C>\ncafé");
    }

    #[test]
    fn ignores_non_text_elements() {
        let xml = r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Bold</w:t></w:r></w:p>"#;
        // A tab *stop definition* still matches <w:tab .../>; it only adds a space.
        assert_eq!(text_from_document_xml(xml).trim(), "Bold");
    }

    #[test]
    fn stops_reading_body_past_limit() {
        let run = "<w:p><w:r><w:t>All quiet on the western front.</w:t></w:r></w:p>";
        let docx = build_docx(&run.repeat(10_000));
        // Highly repetitive XML deflates to a fraction of its inflated size.
        assert!(docx.len() < 64 * 1024, "container is {} bytes", docx.len());

        let err = extract_text_with_limit(&docx, 64 * 1024).unwrap_err();
        assert!(err.contains("expands beyond"), "got: {err}");

        let text = extract_text_with_limit(&docx, 4 * 1024 * 1024).unwrap();
        assert!(text.starts_with("All quiet"));
    }

    #[test]
    fn rejects_non_zip_bytes() {
        let err = extract_text(b"\xD0\xCF\x11\xE0 legacy ole").unwrap_err();
        assert!(err.contains("OOXML"), "got: {err}");
    }

    #[test]
    fn rejects_zip_without_document_part() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("other.xml", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_text(&buf.into_inner()).unwrap_err();
        assert!(err.contains("word/document.xml"), "got: {err}");
    }
}
