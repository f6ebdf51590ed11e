//! Fixed-offset point-cloud payload → PointCloudFrame

use crate::config::{FieldOrder, POINT_FIELDS_BYTES, PointCloudLayout};
use crate::frame::{Point, PointCloudFrame};

/// Number of whole points the payload holds under `layout`.
///
/// A layout whose stride cannot hold four floats holds no points.
pub fn point_count(payload_len: usize, layout: &PointCloudLayout) -> usize {
    if layout.point_step < POINT_FIELDS_BYTES || payload_len <= layout.header_size {
        return 0;
    }
    (payload_len - layout.header_size) / layout.point_step
}

/// Decode a point-cloud payload.
///
/// The first `header_size` bytes are skipped and the body is read as whole
/// `point_step` chunks of little-endian f32. Short payloads and trailing
/// partial points degrade to fewer points; this never fails.
pub fn decode_point_cloud(payload: &[u8], layout: &PointCloudLayout) -> PointCloudFrame {
    let n = point_count(payload.len(), layout);
    if n == 0 {
        return PointCloudFrame::default();
    }
    let body = &payload[layout.header_size..layout.header_size + n * layout.point_step];

    let points = body
        .chunks_exact(layout.point_step)
        .map(|chunk| {
            let f = read_f32x4_le(chunk);
            match layout.field_order {
                FieldOrder::Ixyz => Point::new(f[1], f[2], f[3], f[0]),
                FieldOrder::Xyzi => Point::new(f[0], f[1], f[2], f[3]),
            }
        })
        .collect();

    PointCloudFrame { points }
}

// chunk is at least POINT_FIELDS_BYTES long, see point_count
fn read_f32x4_le(chunk: &[u8]) -> [f32; 4] {
    let mut out = [0f32; 4];
    for (dst, src) in out.iter_mut().zip(chunk[..POINT_FIELDS_BYTES].chunks_exact(4)) {
        *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    }
    out
}
