//! Take thumbnails
//!
//! Grabs the first frame of a finished segment and PNG-encodes it.

use super::state::Thumbnail;
use crate::export::engine::MediaEngine;
use crate::export::types::{ExportError, RgbaFrame};
use std::path::Path;

/// Decode and encode a thumbnail for the segment at `path`
pub fn generate(engine: &dyn MediaEngine, path: &Path, max_width: u32) -> Result<Thumbnail, ExportError> {
    let frame = engine.thumbnail(path, max_width)?;
    encode_png(&frame)
}

pub fn encode_png(frame: &RgbaFrame) -> Result<Thumbnail, ExportError> {
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.data.len() != expected {
        return Err(ExportError::Encoding(format!(
            "Frame is {} bytes, expected {} for {}x{}",
            frame.data.len(),
            expected,
            frame.width,
            frame.height
        )));
    }

    let mut png_bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_bytes, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| ExportError::Encoding(format!("PNG header: {}", e)))?;
        writer
            .write_image_data(&frame.data)
            .map_err(|e| ExportError::Encoding(format!("PNG data: {}", e)))?;
        writer
            .finish()
            .map_err(|e| ExportError::Encoding(format!("PNG finish: {}", e)))?;
    }

    Ok(Thumbnail {
        png: png_bytes,
        width: frame.width,
        height: frame.height,
    })
}
