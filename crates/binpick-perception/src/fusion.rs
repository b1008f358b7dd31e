//! Multi-camera point-cloud fusion.
//!
//! Each camera's world-frame cloud is cropped to the region of interest,
//! given PCA normals, and has those normals turned to face that camera.
//! The per-camera results are concatenated in camera order and voxel
//! downsampled:
//!
//! ```text
//! cloud_i ─crop(bbox)─▶ normals(r, k) ─flip(eye_i)─┐
//!                                                  ├─▶ concat ─▶ voxel(5 mm)
//! cloud_j ─crop(bbox)─▶ normals(r, k) ─flip(eye_j)─┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use binpick_perception::{Aabb, FusionParams, PointCloud, fuse_clouds};
//! use binpick_types::Pose;
//! use nalgebra::{Point3, Translation3, UnitQuaternion};
//!
//! let patch: Vec<_> = (0..10)
//!     .flat_map(|i| (0..10).map(move |j| Point3::new(i as f64 * 0.01, j as f64 * 0.01, 0.0)))
//!     .collect();
//! let cloud = PointCloud::from_positions(patch);
//! let eye = Pose::from_parts(Translation3::new(0.05, 0.05, 1.0), UnitQuaternion::identity());
//! let bbox = Aabb::try_new(Point3::new(-0.1, -0.1, -0.1), Point3::new(0.2, 0.2, 0.1)).unwrap();
//!
//! let fused = fuse_clouds(&[cloud], &bbox, &[eye], &FusionParams::default()).unwrap();
//! assert_eq!(fused.len(), 100);
//! assert!(fused.iter().all(|p| p.normal.is_some_and(|n| n.z > 0.99)));
//! ```

use binpick_types::{PickError, Pose};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cloud::{Aabb, PointCloud};

/// Fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    /// Neighbourhood radius for normal estimation (metres).
    #[serde(default = "default_normal_radius")]
    pub normal_radius: f64,
    /// Maximum neighbours used per normal.
    #[serde(default = "default_normal_neighbors")]
    pub normal_neighbors: usize,
    /// Downsampling voxel edge (metres).
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f64,
}

fn default_normal_radius() -> f64 {
    0.1
}

fn default_normal_neighbors() -> usize {
    30
}

fn default_voxel_size() -> f64 {
    0.005
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            normal_radius: default_normal_radius(),
            normal_neighbors: default_normal_neighbors(),
            voxel_size: default_voxel_size(),
        }
    }
}

/// Fuse per-camera world-frame clouds into one oriented, downsampled cloud.
///
/// `camera_poses[i]` is the world pose of the camera that produced
/// `clouds[i]`; normals of that cloud are flipped toward its origin.
///
/// # Errors
///
/// - [`PickError::InvalidSensorData`] if the two slices differ in length.
/// - [`PickError::RegionDegenerate`] if `bbox` is inverted on any axis.
/// - [`PickError::InsufficientPointData`] if no point survives the crop.
pub fn fuse_clouds(
    clouds: &[PointCloud],
    bbox: &Aabb,
    camera_poses: &[Pose],
    params: &FusionParams,
) -> Result<PointCloud, PickError> {
    if clouds.len() != camera_poses.len() {
        return Err(PickError::InvalidSensorData(format!(
            "{} clouds but {} camera poses",
            clouds.len(),
            camera_poses.len()
        )));
    }
    bbox.validate()?;

    let mut oriented = Vec::with_capacity(clouds.len());
    for (i, (cloud, pose)) in clouds.iter().zip(camera_poses).enumerate() {
        let mut cropped = cloud.crop(bbox)?;
        cropped.estimate_normals(params.normal_radius, params.normal_neighbors);
        cropped.flip_normals_towards(&Point3::from(pose.translation.vector));
        debug!(camera = i, input = cloud.len(), cropped = cropped.len(), "camera cloud oriented");
        oriented.push(cropped);
    }

    let merged = PointCloud::concatenate(&oriented);
    if merged.is_empty() {
        return Err(PickError::InsufficientPointData);
    }
    let fused = merged.voxel_downsample(params.voxel_size);
    info!(merged = merged.len(), fused = fused.len(), "clouds fused");
    Ok(fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    fn camera_at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
    }

    fn patch(z: f64) -> PointCloud {
        PointCloud::from_positions(
            (0..10).flat_map(|i| (0..10).map(move |j| Point3::new(i as f64 * 0.01, j as f64 * 0.01, z))),
        )
    }

    fn roi() -> Aabb {
        Aabb::try_new(Point3::new(-0.05, -0.05, -0.05), Point3::new(0.15, 0.15, 0.05)).unwrap()
    }

    #[test]
    fn mismatched_inputs_fail() {
        let err = fuse_clouds(&[patch(0.0)], &roi(), &[], &FusionParams::default()).unwrap_err();
        assert!(matches!(err, PickError::InvalidSensorData(_)));
    }

    #[test]
    fn inverted_box_fails_before_work() {
        let bad = Aabb {
            min: Point3::new(0.0, 0.0, 1.0),
            max: Point3::new(1.0, 1.0, 0.0),
        };
        let err = fuse_clouds(&[patch(0.0)], &bad, &[camera_at(0.0, 0.0, 1.0)], &FusionParams::default())
            .unwrap_err();
        assert!(matches!(err, PickError::RegionDegenerate { axis: 'z', .. }));
    }

    #[test]
    fn nothing_inside_box_is_insufficient() {
        let err = fuse_clouds(&[patch(1.0)], &roi(), &[camera_at(0.0, 0.0, 2.0)], &FusionParams::default())
            .unwrap_err();
        assert_eq!(err, PickError::InsufficientPointData);
    }

    #[test]
    fn no_cameras_is_insufficient() {
        let err = fuse_clouds(&[], &roi(), &[], &FusionParams::default()).unwrap_err();
        assert_eq!(err, PickError::InsufficientPointData);
    }

    #[test]
    fn normals_face_their_own_camera() {
        let above = fuse_clouds(&[patch(0.0)], &roi(), &[camera_at(0.05, 0.05, 1.0)], &FusionParams::default())
            .unwrap();
        assert!(above.iter().all(|p| p.normal.unwrap().z > 0.99));

        let below = fuse_clouds(&[patch(0.0)], &roi(), &[camera_at(0.05, 0.05, -1.0)], &FusionParams::default())
            .unwrap();
        assert!(below.iter().all(|p| p.normal.unwrap().z < -0.99));
    }

    #[test]
    fn overlapping_views_merge_in_voxels() {
        let clouds = [patch(0.0), patch(0.0)];
        let poses = [camera_at(0.05, 0.05, 1.0), camera_at(0.0, 0.0, 1.0)];
        let fused = fuse_clouds(&clouds, &roi(), &poses, &FusionParams::default()).unwrap();
        assert_eq!(fused.len(), 100);
        assert!(fused.has_normals());
    }

    #[test]
    fn fusion_is_deterministic() {
        let clouds = [patch(0.0), patch(0.002)];
        let poses = [camera_at(0.05, 0.05, 1.0), camera_at(0.1, 0.0, 0.8)];
        let a = fuse_clouds(&clouds, &roi(), &poses, &FusionParams::default()).unwrap();
        let b = fuse_clouds(&clouds, &roi(), &poses, &FusionParams::default()).unwrap();
        assert_eq!(a, b);
    }
}
