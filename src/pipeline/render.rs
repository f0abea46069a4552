//! Rasterisation via pdfium: first PDF page, or lines of text on a canvas.
//!
//! Everything here is blocking. Callers run it inside
//! `tokio::task::spawn_blocking` because pdfium keeps thread-local state and
//! rendering is CPU-bound.
//!
//! Text canvases (DOCX bodies, legacy-format placeholders) are drawn by
//! building a one-page PDF in memory with pdfium's built-in Helvetica and
//! rendering it through the same path as a real PDF page, so every format
//! ends up with identical scaling and the same pixel bounds.

use crate::config::CanvasLayout;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Bind a pdfium library.
///
/// Order: explicit `lib_path` (a directory or the library file itself), then
/// the working directory, then the system library path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match lib_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| format!("failed to bind pdfium: {:?}", e))?;

    Ok(Pdfium::new(bindings))
}

/// Render the first page of a PDF held in memory.
pub fn render_first_page(
    pdfium: &Pdfium,
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, String> {
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("cannot open PDF: {:?}", e))?;

    let pages = document.pages();
    let total_pages = pages.len();
    if total_pages == 0 {
        return Err("PDF has no pages".to_string());
    }
    info!("PDF loaded: {} pages, rendering page 1", total_pages);

    let page = pages
        .get(0)
        .map_err(|e| format!("cannot load page 1: {:?}", e))?;

    render_page(&page, dpi, max_pixels)
}

/// Draw `lines` top-to-bottom on a blank canvas and rasterise it.
///
/// Lines past the bottom margin are dropped.
pub fn render_text_canvas(
    pdfium: &Pdfium,
    lines: &[String],
    layout: &CanvasLayout,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, String> {
    let mut document = pdfium
        .create_new_pdf()
        .map_err(|e| format!("cannot create canvas document: {:?}", e))?;
    let font = document.fonts_mut().helvetica();

    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::Custom(
            PdfPoints::new(layout.width_pt),
            PdfPoints::new(layout.height_pt),
        ))
        .map_err(|e| format!("cannot create canvas page: {:?}", e))?;

    let mut baseline = layout.height_pt - layout.margin_pt - layout.font_size_pt;
    for line in lines.iter().take(layout.lines_per_page()) {
        if !line.trim().is_empty() {
            page.objects_mut()
                .create_text_object(
                    PdfPoints::new(layout.margin_pt),
                    PdfPoints::new(baseline),
                    line,
                    font,
                    PdfPoints::new(layout.font_size_pt),
                )
                .map_err(|e| format!("cannot draw text: {:?}", e))?;
        }
        baseline -= layout.line_height_pt;
    }

    render_page(&page, dpi, max_pixels)
}

fn render_page(page: &PdfPage, dpi: u32, max_pixels: u32) -> Result<DynamicImage, String> {
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| format!("rasterisation failed: {:?}", e))?;

    let image = bitmap.as_image();
    debug!("Rendered page → {}x{} px", image.width(), image.height());
    Ok(image)
}

// ── Text layout ──────────────────────────────────────────────────────────

/// Word-wrap `text` to the canvas width and cut it at the canvas height.
///
/// Paragraph breaks (`\n`) are kept, blank paragraphs become blank lines, and
/// words longer than a line are split hard. Overflow is not an error.
pub fn layout_lines(text: &str, layout: &CanvasLayout) -> Vec<String> {
    let mut lines = wrap_text(text, layout.chars_per_line());
    let capacity = layout.lines_per_page();
    if lines.len() > capacity {
        debug!(
            "Canvas holds {} lines, truncating {} overflow lines",
            capacity,
            lines.len() - capacity
        );
        lines.truncate(capacity);
    }
    lines
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();

            // Hard-split words that could never fit.
            while word.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if current_len == 0 {
                word.len()
            } else {
                current_len + 1 + word.len()
            };
            if needed > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }

        lines.push(current);
    }

    lines
}

/// Lines for the image that stands in for a file we cannot extract text from.
pub fn placeholder_lines(file_name: &str, media_type: &str, layout: &CanvasLayout) -> Vec<String> {
    let text = format!(
        "Document preview unavailable\n\
         \n\
         File: {file_name}\n\
         Format: {media_type}\n\
         \n\
         Reason: unsupported legacy format\n\
         Text extraction is not supported for legacy binary word-processing files. \
         Analysis will rely on the file metadata shown above."
    );
    layout_lines(&text, layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn keeps_paragraphs_and_blank_lines() {
        let lines = wrap_text("first\n\nsecond", 20);
        assert_eq!(lines, vec!["first", "", "second"]);
    }

    #[test]
    fn splits_overlong_words() {
        let lines = wrap_text("ab abcdefghij", 4);
        assert_eq!(lines, vec!["ab", "abcd", "efgh", "ij"]);
    }

    #[test]
    fn collapses_internal_whitespace() {
        let lines = wrap_text("a\t\tb   c", 80);
        assert_eq!(lines, vec!["a b c"]);
    }

    #[test]
    fn overflow_is_truncated_silently() {
        let layout = CanvasLayout::default();
        let text = "line\n".repeat(500);
        let lines = layout_lines(&text, &layout);
        assert_eq!(lines.len(), layout.lines_per_page());
    }

    #[test]
    fn placeholder_names_file_and_reason() {
        let lines = placeholder_lines("minutes-1943.doc", "application/msword", &CanvasLayout::default());
        let joined = lines.join("\n");
        assert!(joined.contains("minutes-1943.doc"));
        assert!(joined.contains("unsupported legacy format"));
        assert!(joined.contains("application/msword"));
    }

    #[test]
    fn placeholder_is_deterministic() {
        let layout = CanvasLayout::default();
        assert_eq!(
            placeholder_lines("a.doc", "application/msword", &layout),
            placeholder_lines("a.doc", "application/msword", &layout)
        );
    }
}
