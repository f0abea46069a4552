//! Format dispatch: any supported file → exactly one [`ImagePayload`].
//!
//! The analysis step has a single contract (one image in, text out), so every
//! input format is normalised to one raster image here. Multi-page content and
//! rich text layout are deliberately given up in exchange.
//!
//! ```text
//! application/pdf  ──▶ render page 1 ─────────────┐
//! .docx            ──▶ extract text ─▶ canvas ────┤
//! application/msword ─▶ placeholder ─▶ canvas ────┼──▶ PNG / base64
//! image/*          ──▶ (unchanged) ───────────────┴──▶ original mime / base64
//! ```

use crate::config::{CanvasLayout, PipelineConfig};
use crate::error::DocScanError;
use crate::output::{ImagePayload, RetrievedFile};
use crate::pipeline::{docx, encode, render};
use std::path::PathBuf;
use tracing::{debug, info};

/// Input families the dispatcher knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// Paginated document; only the first page is used.
    Pdf,
    /// OOXML word-processing document (`.docx`).
    WordProcessing,
    /// Legacy binary word-processing document (`.doc`); placeholder only.
    ///
    /// The placeholder is a rendered text canvas, so it needs pdfium like
    /// the other canvas formats. Without a bindable pdfium library a `.doc`
    /// fails with [`DocScanError::ConversionFailed`].
    LegacyWord,
    /// Already an image; passed through.
    Raster,
}

impl FormatFamily {
    /// Classify a media type. Case and parameters (`; charset=…`) are ignored.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match normalize_media_type(media_type).as_str() {
            "application/pdf" | "application/x-pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::WordProcessing)
            }
            "application/msword" => Some(Self::LegacyWord),
            "image/jpeg" | "image/jpg" | "image/png" | "image/gif" | "image/bmp"
            | "image/x-ms-bmp" => Some(Self::Raster),
            _ => None,
        }
    }
}

/// `"Image/PNG; q=1"` → `"image/png"`
pub fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Converts retrieved files to images according to [`FormatFamily`].
#[derive(Debug, Clone)]
pub struct ConversionDispatcher {
    dpi: u32,
    max_rendered_pixels: u32,
    canvas: CanvasLayout,
    pdfium_lib_path: Option<PathBuf>,
}

impl ConversionDispatcher {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            canvas: config.canvas,
            pdfium_lib_path: config.pdfium_lib_path.clone(),
        }
    }

    /// Convert `file` into a single image.
    ///
    /// # Errors
    /// - [`DocScanError::UnsupportedFormat`] for media types outside the dispatch table
    /// - [`DocScanError::ConversionFailed`] for corrupt payloads or pdfium failures
    pub async fn convert(&self, file: &RetrievedFile) -> Result<ImagePayload, DocScanError> {
        let family = FormatFamily::from_media_type(&file.media_type).ok_or_else(|| {
            DocScanError::UnsupportedFormat {
                media_type: file.media_type.clone(),
            }
        })?;
        info!(
            "Converting '{}' ({}, {} bytes) as {:?}",
            file.name, file.media_type, file.size_bytes, family
        );

        match family {
            FormatFamily::Raster => self.pass_through(file),
            FormatFamily::Pdf => {
                let bytes = file.bytes.clone();
                self.render_blocking(&file.name, move |pdfium, dpi, max_px, _| {
                    render::render_first_page(pdfium, &bytes, dpi, max_px)
                })
                .await
            }
            FormatFamily::WordProcessing => {
                let bytes = file.bytes.clone();
                self.render_blocking(&file.name, move |pdfium, dpi, max_px, canvas| {
                    let text = docx::extract_text(&bytes)?;
                    debug!("Extracted {} chars of document text", text.len());
                    let text = if text.trim().is_empty() {
                        "(document contains no text)".to_string()
                    } else {
                        text
                    };
                    let lines = render::layout_lines(&text, canvas);
                    render::render_text_canvas(pdfium, &lines, canvas, dpi, max_px)
                })
                .await
            }
            FormatFamily::LegacyWord => {
                info!("'{}' is a legacy word-processing file; using placeholder", file.name);
                let lines = render::placeholder_lines(&file.name, &file.media_type, &self.canvas);
                self.render_blocking(&file.name, move |pdfium, dpi, max_px, canvas| {
                    render::render_text_canvas(pdfium, &lines, canvas, dpi, max_px)
                })
                .await
            }
        }
    }

    fn pass_through(&self, file: &RetrievedFile) -> Result<ImagePayload, DocScanError> {
        if image::guess_format(&file.bytes).is_err() {
            return Err(DocScanError::conversion(
                &file.name,
                format!("bytes are not a recognisable {} image", file.media_type),
            ));
        }
        Ok(encode::encode_passthrough(
            &file.bytes,
            &normalize_media_type(&file.media_type),
        ))
    }

    /// Bind pdfium, run `job` on the blocking pool and PNG-encode its image.
    async fn render_blocking<F>(&self, file_name: &str, job: F) -> Result<ImagePayload, DocScanError>
    where
        F: FnOnce(&pdfium_render::prelude::Pdfium, u32, u32, &CanvasLayout) -> Result<image::DynamicImage, String>
            + Send
            + 'static,
    {
        let dpi = self.dpi;
        let max_px = self.max_rendered_pixels;
        let canvas = self.canvas;
        let lib_path = self.pdfium_lib_path.clone();

        let rendered = tokio::task::spawn_blocking(move || {
            let pdfium = render::bind_pdfium(lib_path.as_deref())?;
            let image = job(&pdfium, dpi, max_px, &canvas)?;
            encode::encode_png(&image).map_err(|e| format!("PNG encoding failed: {e}"))
        })
        .await
        .map_err(|e| DocScanError::Internal(format!("Render task panicked: {}", e)))?;

        rendered.map_err(|detail| DocScanError::conversion(file_name, detail))
    }
}
