//! JPEG frame embedded in a message blob → ImageFrame

use image::ImageFormat;

use crate::error::DecodeError;
use crate::frame::ImageFrame;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Slice from the first start-of-image marker through the last
/// end-of-image marker, inclusive.
pub fn extract_jpeg(payload: &[u8]) -> Option<&[u8]> {
    let start = payload.windows(2).position(|w| w == SOI)?;
    let end = payload.windows(2).rposition(|w| w == EOI)?;
    // the end marker must not overlap the start marker
    if end < start + 2 {
        return None;
    }
    Some(&payload[start..end + 2])
}

/// Locate the embedded JPEG, decode it and return it in RGB order.
pub fn decode_image(payload: &[u8]) -> Result<ImageFrame, DecodeError> {
    let jpeg = extract_jpeg(payload).ok_or(DecodeError::MarkersNotFound)?;
    let dyn_img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?;
    let rgb8 = dyn_img.to_rgb8();
    let (width, height) = rgb8.dimensions();
    tracing::trace!(width, height, jpeg_len = jpeg.len(), "decoded jpeg");
    Ok(ImageFrame {
        width,
        height,
        rgb: rgb8.into_raw(),
    })
}
