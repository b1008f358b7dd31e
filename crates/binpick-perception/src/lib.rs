//! `binpick-perception` – from camera frames to a fused, oriented point cloud.
//!
//! # Modules
//!
//! - [`segment`] – [`Segmenter`][segment::Segmenter] seam and
//!   [`acquire_target_mask`][segment::acquire_target_mask]: text-prompted
//!   instance masks with an explicit "nothing found" failure.
//! - [`roi`] – [`compute_region_of_interest`][roi::compute_region_of_interest]:
//!   back-projects mask corners through the depth image into a padded
//!   world-frame crop box.
//! - [`cloud`] – [`PointCloud`][cloud::PointCloud] and [`Aabb`][cloud::Aabb]:
//!   cropping, normal estimation, normal re-orientation, voxel downsampling.
//! - [`fusion`] – [`fuse_clouds`][fusion::fuse_clouds]: the per-camera
//!   crop/normals/flip pipeline followed by merge and downsample.

pub mod cloud;
pub mod fusion;
pub mod roi;
pub mod segment;

pub use cloud::{Aabb, CloudPoint, PointCloud};
pub use fusion::{FusionParams, fuse_clouds};
pub use roi::{RoiParams, compute_region_of_interest};
pub use segment::{Detection, Mask, Segmenter, acquire_target_mask};
