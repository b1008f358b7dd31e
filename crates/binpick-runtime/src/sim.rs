//! Stand-ins for the external collaborators, sized for the gantry arm in
//! [`binpick_hal::sim`].
//!
//! - [`ColorSegmenter`] – thresholds the rendered object colour.
//! - [`GantryOptimizer`] – straight joint-space motions at a bounded speed.
//! - [`GantryDiffIk`] – rate-limited joint stepping toward the desired pose.

use std::f64::consts::PI;

use binpick_hal::sim::gantry_joints;
use binpick_hal::{ArmState, RgbImage};
use binpick_perception::{Detection, Mask, Segmenter};
use binpick_planner::{Constraints, JointTrajectory, MotionOptimizer, MotionRequest};
use binpick_types::{PickError, Pose};
use nalgebra::DVector;
use tracing::trace;

use crate::control::DifferentialIk;

/// Wrap an angle into `(-π, π]`.
fn wrap_angle(a: f64) -> f64 {
    let wrapped = (a + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Gantry joints for `pose`, with the angle joints unwrapped to lie within
/// half a turn of `near`.
fn joints_near(pose: &Pose, near: &DVector<f64>) -> DVector<f64> {
    let mut q = gantry_joints(pose);
    for i in 3..6.min(q.len()).min(near.len()) {
        q[i] = near[i] + wrap_angle(q[i] - near[i]);
    }
    q
}

// ─────────────────────────────────────────────────────────────────────────────
// ColorSegmenter
// ─────────────────────────────────────────────────────────────────────────────

/// Segments saturated red pixels as the single target instance.
#[derive(Debug, Clone, Copy)]
pub struct ColorSegmenter {
    pub min_red: u8,
    pub max_other: u8,
}

impl Default for ColorSegmenter {
    fn default() -> Self {
        Self {
            min_red: 150,
            max_other: 100,
        }
    }
}

impl Segmenter for ColorSegmenter {
    fn predict(&self, image: &RgbImage, prompt: &str) -> Result<Vec<Detection>, PickError> {
        if image.data.len() != (image.width * image.height) as usize {
            return Err(PickError::InvalidSensorData(format!(
                "{} pixels for a {}x{} image",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        let mut mask = Mask::new(image.width, image.height);
        let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
        for row in 0..image.height {
            for col in 0..image.width {
                let Some([r, g, b]) = image.pixel(row, col) else {
                    continue;
                };
                if r >= self.min_red && g <= self.max_other && b <= self.max_other {
                    mask.set(row, col, true);
                    bbox[0] = bbox[0].min(col as f32);
                    bbox[1] = bbox[1].min(row as f32);
                    bbox[2] = bbox[2].max(col as f32);
                    bbox[3] = bbox[3].max(row as f32);
                }
            }
        }
        if mask.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            mask,
            bbox,
            phrase: prompt.to_string(),
            score: 1.0,
        }])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GantryOptimizer
// ─────────────────────────────────────────────────────────────────────────────

/// Joint-space straight lines for the gantry. The full solve adds a
/// midpoint lifted to the higher of the two endpoints.
#[derive(Debug, Clone, Copy)]
pub struct GantryOptimizer {
    /// Metres per second.
    pub linear_speed: f64,
    /// Radians per second.
    pub angular_speed: f64,
    pub min_duration: f64,
}

impl Default for GantryOptimizer {
    fn default() -> Self {
        Self {
            linear_speed: 0.5,
            angular_speed: 1.0,
            min_duration: 0.5,
        }
    }
}

impl MotionOptimizer for GantryOptimizer {
    fn optimize(&self, request: &MotionRequest<'_>) -> Result<JointTrajectory, PickError> {
        let start = gantry_joints(&request.start);
        let goal = joints_near(&request.goal, &start);
        let delta = &goal - &start;
        let linear = delta.rows(0, 3).norm();
        let angular = delta.rows(3, 3).amax();
        let duration = (linear / self.linear_speed)
            .max(angular / self.angular_speed)
            .max(self.min_duration);
        if !duration.is_finite() {
            return Err(PickError::TrajectoryOptimizationFailed(format!(
                "non-finite duration {duration}"
            )));
        }
        trace!(linear, angular, duration, constraints = ?request.constraints, "gantry solve");

        let t0 = request.start_time;
        match request.constraints {
            Constraints::Relaxed => {
                JointTrajectory::first_order_hold(vec![t0, t0 + duration], vec![start, goal])
            }
            Constraints::Full => {
                let mut mid = (&start + &goal) / 2.0;
                mid[2] = start[2].max(goal[2]);
                JointTrajectory::first_order_hold(
                    vec![t0, t0 + duration / 2.0, t0 + duration],
                    vec![start, mid, goal],
                )
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GantryDiffIk
// ─────────────────────────────────────────────────────────────────────────────

/// Steps each gantry joint toward the desired pose, limited per tick.
#[derive(Debug, Clone)]
pub struct GantryDiffIk {
    pub linear_speed: f64,
    pub angular_speed: f64,
    integrator: Option<DVector<f64>>,
}

impl GantryDiffIk {
    pub fn new(linear_speed: f64, angular_speed: f64) -> Self {
        Self {
            linear_speed,
            angular_speed,
            integrator: None,
        }
    }
}

impl Default for GantryDiffIk {
    fn default() -> Self {
        Self::new(0.5, 1.0)
    }
}

impl DifferentialIk for GantryDiffIk {
    fn solve(&mut self, desired: &Pose, measured: &ArmState, reset: bool, dt: f64) -> DVector<f64> {
        let current = match self.integrator.take() {
            Some(q) if !reset && q.len() == measured.joints.len() => q,
            _ => measured.joints.clone(),
        };
        let target = joints_near(desired, &current);

        let mut next = current.clone();
        for i in 0..next.len().min(target.len()) {
            let speed = if (3..6).contains(&i) {
                self.angular_speed
            } else {
                self.linear_speed
            };
            let limit = speed * dt;
            next[i] += (target[i] - current[i]).clamp(-limit, limit);
        }
        self.integrator = Some(next.clone());
        next
    }
}
