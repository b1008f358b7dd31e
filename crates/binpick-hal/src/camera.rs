//! Generic `Camera` trait and supporting types for RGB-D capture hardware.

use binpick_types::{PickError, Pose};
use nalgebra::Point3;

/// Pinhole intrinsics. Pixel `(u, v)` is column `u`, row `v`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Back-project pixel `(u, v)` at depth `z` into the camera frame.
    pub fn back_project(&self, u: f64, v: f64, z: f64) -> Point3<f64> {
        Point3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }
}

/// Row-major 8-bit RGB image.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<[u8; 3]>,
}

impl RgbImage {
    pub fn pixel(&self, row: u32, col: u32) -> Option<[u8; 3]> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get((row * self.width + col) as usize).copied()
    }
}

/// Row-major depth image in metres. Non-finite values mean "no return".
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthImage {
    pub fn depth(&self, row: u32, col: u32) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get((row * self.width + col) as usize).copied()
    }
}

/// One synchronized capture from an RGB-D camera.
#[derive(Debug, Clone)]
pub struct RgbdFrame {
    pub rgb: RgbImage,
    pub depth: DepthImage,
    pub intrinsics: CameraIntrinsics,
    /// Camera pose in the world frame (`X_WC`). The camera looks along its +z.
    pub pose: Pose,
    /// World-frame points for every pixel with a valid return.
    pub points: Vec<Point3<f64>>,
}

/// An RGB-D camera.
pub trait Camera: Send + Sync {
    /// Stable identifier for this camera, e.g. `"camera0"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::HardwareFault`] if the frame cannot be captured.
    fn capture(&mut self) -> Result<RgbdFrame, PickError>;
}
