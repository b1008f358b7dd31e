//! Mask → world-frame region of interest.
//!
//! The two mask pixels with the smallest and largest `row + col` are taken
//! as opposite image-space corners of the target. Each is back-projected
//! through the depth image with the pinhole model
//!
//! ```text
//! X = (u − cx)·Z / fx      Y = (v − cy)·Z / fy
//! ```
//!
//! moved into the world frame, sorted per axis, and padded by
//! [`RoiParams::margin`].

use binpick_hal::{CameraIntrinsics, DepthImage};
use binpick_types::{PickError, Pose};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::Aabb;
use crate::segment::Mask;

/// Region-of-interest parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiParams {
    /// Padding added on every side of the box (metres).
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_margin() -> f64 {
    0.025
}

impl Default for RoiParams {
    fn default() -> Self {
        Self {
            margin: default_margin(),
        }
    }
}

/// Compute the padded crop box for `mask`.
///
/// Ties on `row + col` keep the first pixel in row-major order.
///
/// # Errors
///
/// - [`PickError::NoTargetDetected`] if the mask has no set pixel.
/// - [`PickError::InvalidSensorData`] if mask, depth, and intrinsics
///   disagree on resolution, or a corner pixel has no valid depth.
/// - [`PickError::RegionDegenerate`] if a negative margin collapses the box.
pub fn compute_region_of_interest(
    mask: &Mask,
    depth: &DepthImage,
    intrinsics: &CameraIntrinsics,
    camera_pose: &Pose,
    params: &RoiParams,
) -> Result<Aabb, PickError> {
    if (mask.width, mask.height) != (depth.width, depth.height)
        || (depth.width, depth.height) != (intrinsics.width, intrinsics.height)
    {
        return Err(PickError::InvalidSensorData(format!(
            "mask {}x{}, depth {}x{}, intrinsics {}x{}",
            mask.width, mask.height, depth.width, depth.height, intrinsics.width, intrinsics.height
        )));
    }

    let mut first: Option<(u32, u32)> = None;
    let mut last: Option<(u32, u32)> = None;
    for (row, col) in mask.pixels() {
        let s = row + col;
        if first.is_none_or(|(r, c)| s < r + c) {
            first = Some((row, col));
        }
        if last.is_none_or(|(r, c)| s > r + c) {
            last = Some((row, col));
        }
    }
    let (Some(first), Some(last)) = (first, last) else {
        return Err(PickError::NoTargetDetected {
            prompt: "empty mask".to_string(),
        });
    };

    let a = corner_in_world(first, depth, intrinsics, camera_pose)?;
    let b = corner_in_world(last, depth, intrinsics, camera_pose)?;
    let sorted = Aabb::from_corners(a, b);
    let m = params.margin;
    let bbox = Aabb::try_new(
        sorted.min - nalgebra::Vector3::repeat(m),
        sorted.max + nalgebra::Vector3::repeat(m),
    )?;
    debug!(
        first = ?first, last = ?last,
        min = ?bbox.min.coords.as_slice(), max = ?bbox.max.coords.as_slice(),
        "region of interest"
    );
    Ok(bbox)
}

fn corner_in_world(
    (row, col): (u32, u32),
    depth: &DepthImage,
    intrinsics: &CameraIntrinsics,
    camera_pose: &Pose,
) -> Result<Point3<f64>, PickError> {
    let z = depth.depth(row, col).map(f64::from).unwrap_or(f64::NAN);
    if !z.is_finite() || z <= 0.0 {
        return Err(PickError::InvalidSensorData(format!(
            "invalid depth {z} at pixel (row {row}, col {col})"
        )));
    }
    Ok(camera_pose * intrinsics.back_project(col as f64, row as f64, z))
}
