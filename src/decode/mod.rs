//! Payload decoders for lidar and camera records.

pub mod images;
pub mod pointcloud;

use crate::config::{Modality, PointCloudLayout};
use crate::error::DecodeError;
use crate::frame::Frame;

pub use images::{decode_image, extract_jpeg};
pub use pointcloud::decode_point_cloud;

/// Decode a raw payload according to the stream's modality.
pub fn decode_payload(
    modality: Modality,
    payload: &[u8],
    layout: &PointCloudLayout,
) -> Result<Frame, DecodeError> {
    match modality {
        Modality::Lidar => Ok(Frame::PointCloud(decode_point_cloud(payload, layout))),
        Modality::Camera => decode_image(payload).map(Frame::Image),
    }
}
