//! Image encoding: bytes / `DynamicImage` → base64 [`ImagePayload`].
//!
//! Rendered pages and canvases are PNG-encoded because PNG is lossless; text
//! crispness matters far more than file size for the model reading it.
//! Raster inputs are wrapped byte-for-byte with their declared mime type.

use crate::output::ImagePayload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered image as a base64 PNG payload.
pub fn encode_png(img: &DynamicImage) -> Result<ImagePayload, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImagePayload {
        mime_type: "image/png".to_string(),
        data: b64,
        width: Some(img.width()),
        height: Some(img.height()),
    })
}

/// Wrap already-encoded image bytes without touching them.
pub fn encode_passthrough(bytes: &[u8], mime_type: &str) -> ImagePayload {
    let b64 = STANDARD.encode(bytes);
    debug!("Passing through {} image → {} bytes base64", mime_type, b64.len());

    ImagePayload {
        mime_type: mime_type.to_string(),
        data: b64,
        width: None,
        height: None,
    }
}
