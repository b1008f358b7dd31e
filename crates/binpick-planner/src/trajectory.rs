//! Time-parameterized trajectories owned by the task planner.
//!
//! All three trajectory kinds share the same shape: a strictly increasing
//! list of break times with one knot per break, evaluated by first-order
//! hold between knots and clamped outside `[start_time, end_time]`. The last
//! break may be `+∞`, which makes a trajectory that holds its final value
//! forever.

use binpick_types::{PickError, Pose};
use nalgebra::{DVector, Isometry3, Translation3};

/// Values that can be linearly blended between two knots.
pub trait Interpolate: Clone {
    /// Number of scalar components, used to reject mixed-size knots.
    fn dimension(&self) -> usize;

    /// `a + (b − a)·s`.
    fn lerp(a: &Self, b: &Self, s: f64) -> Self;
}

impl Interpolate for f64 {
    fn dimension(&self) -> usize {
        1
    }

    fn lerp(a: &Self, b: &Self, s: f64) -> Self {
        a + (b - a) * s
    }
}

impl Interpolate for DVector<f64> {
    fn dimension(&self) -> usize {
        self.len()
    }

    fn lerp(a: &Self, b: &Self, s: f64) -> Self {
        a + (b - a) * s
    }
}

fn validate_breaks(breaks: &[f64], knots: usize) -> Result<(), PickError> {
    if breaks.len() != knots {
        return Err(PickError::InvalidTrajectory(format!(
            "{} breaks for {knots} knots",
            breaks.len()
        )));
    }
    if breaks.len() < 2 {
        return Err(PickError::InvalidTrajectory(
            "at least two breaks are required".to_string(),
        ));
    }
    if !breaks[0].is_finite() {
        return Err(PickError::InvalidTrajectory(format!(
            "start time {} is not finite",
            breaks[0]
        )));
    }
    if let Some(w) = breaks.windows(2).find(|w| !(w[1] > w[0])) {
        return Err(PickError::InvalidTrajectory(format!(
            "break times must increase, got {} then {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// Segment index and blend fraction for time `t`, clamped to the breaks.
fn locate(breaks: &[f64], t: f64) -> (usize, f64) {
    let last = breaks.len() - 1;
    if t.is_nan() || t <= breaks[0] {
        return (0, 0.0);
    }
    if t >= breaks[last] {
        return (last - 1, 1.0);
    }
    let i = breaks.partition_point(|&b| b <= t) - 1;
    let (t0, t1) = (breaks[i], breaks[i + 1]);
    let s = if t1.is_finite() { (t - t0) / (t1 - t0) } else { 0.0 };
    (i, s)
}

// ────────────────────────────────────────────────────────────────────────────
// PiecewiseLinear
// ────────────────────────────────────────────────────────────────────────────

/// A first-order-hold trajectory over knots of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinear<T> {
    breaks: Vec<f64>,
    knots: Vec<T>,
}

/// Joint positions over time.
pub type JointTrajectory = PiecewiseLinear<DVector<f64>>;

/// Gripper finger separation over time.
pub type WidthTrajectory = PiecewiseLinear<f64>;

impl<T: Interpolate> PiecewiseLinear<T> {
    /// Build a trajectory through `knots` at the given `breaks`.
    ///
    /// # Errors
    ///
    /// [`PickError::InvalidTrajectory`] when the lengths differ, fewer than
    /// two knots are given, the breaks are not strictly increasing, or the
    /// knots do not all have the same dimension.
    pub fn first_order_hold(breaks: Vec<f64>, knots: Vec<T>) -> Result<Self, PickError> {
        validate_breaks(&breaks, knots.len())?;
        let dim = knots[0].dimension();
        if let Some(bad) = knots.iter().find(|k| k.dimension() != dim) {
            return Err(PickError::InvalidTrajectory(format!(
                "knot dimension {} does not match {dim}",
                bad.dimension()
            )));
        }
        Ok(Self { breaks, knots })
    }

    /// Extend the trajectory with one more knot at `time`.
    pub fn append(&mut self, time: f64, knot: T) -> Result<(), PickError> {
        let end = self.end_time();
        if !(time > end) {
            return Err(PickError::InvalidTrajectory(format!(
                "appended time {time} does not follow end time {end}"
            )));
        }
        if knot.dimension() != self.knots[0].dimension() {
            return Err(PickError::InvalidTrajectory(format!(
                "knot dimension {} does not match {}",
                knot.dimension(),
                self.knots[0].dimension()
            )));
        }
        self.breaks.push(time);
        self.knots.push(knot);
        Ok(())
    }

    pub fn start_time(&self) -> f64 {
        self.breaks[0]
    }

    pub fn end_time(&self) -> f64 {
        self.breaks[self.breaks.len() - 1]
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// `true` when `start_time ≤ t ≤ end_time`.
    pub fn is_time_in_range(&self, t: f64) -> bool {
        t >= self.start_time() && t <= self.end_time()
    }

    /// Value at `t`, clamped to the first/last knot outside the range.
    pub fn value(&self, t: f64) -> T {
        let (i, s) = locate(&self.breaks, t);
        T::lerp(&self.knots[i], &self.knots[i + 1], s)
    }

    pub fn breaks(&self) -> &[f64] {
        &self.breaks
    }

    pub fn knots(&self) -> &[T] {
        &self.knots
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseTrajectory
// ────────────────────────────────────────────────────────────────────────────

/// Gripper poses over time: linear in translation, slerp in rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseTrajectory {
    breaks: Vec<f64>,
    poses: Vec<Pose>,
}

impl PoseTrajectory {
    pub fn linear(breaks: Vec<f64>, poses: Vec<Pose>) -> Result<Self, PickError> {
        validate_breaks(&breaks, poses.len())?;
        Ok(Self { breaks, poses })
    }

    /// Hold `pose` from `from` onwards, forever.
    pub fn hold(pose: Pose, from: f64) -> Self {
        Self {
            breaks: vec![from, f64::INFINITY],
            poses: vec![pose, pose],
        }
    }

    pub fn start_time(&self) -> f64 {
        self.breaks[0]
    }

    pub fn end_time(&self) -> f64 {
        self.breaks[self.breaks.len() - 1]
    }

    pub fn is_time_in_range(&self, t: f64) -> bool {
        t >= self.start_time() && t <= self.end_time()
    }

    pub fn value(&self, t: f64) -> Pose {
        let (i, s) = locate(&self.breaks, t);
        let (a, b) = (&self.poses[i], &self.poses[i + 1]);
        let translation = a.translation.vector.lerp(&b.translation.vector, s);
        // Half-turn apart has no unique slerp; snap to the nearer knot.
        let rotation = a
            .rotation
            .try_slerp(&b.rotation, s, 1e-9)
            .unwrap_or(if s < 0.5 { a.rotation } else { b.rotation });
        Isometry3::from_parts(Translation3::from(translation), rotation)
    }

    pub fn breaks(&self) -> &[f64] {
        &self.breaks
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binpick_types::pose_from_rpy;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn width_trajectory_interpolates_and_clamps() {
        let traj = WidthTrajectory::first_order_hold(vec![1.0, 3.0, 4.0], vec![0.1, 0.0, 0.0]).unwrap();
        assert!((traj.value(2.0) - 0.05).abs() < 1e-12);
        assert!((traj.value(0.0) - 0.1).abs() < 1e-12);
        assert!((traj.value(10.0) - 0.0).abs() < 1e-12);
        assert!((traj.duration() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn range_is_inclusive_at_both_ends() {
        let traj = WidthTrajectory::first_order_hold(vec![1.0, 2.0], vec![0.0, 1.0]).unwrap();
        assert!(traj.is_time_in_range(1.0));
        assert!(traj.is_time_in_range(2.0));
        assert!(!traj.is_time_in_range(2.0001));
        assert!(!traj.is_time_in_range(0.9999));
    }

    #[test]
    fn rejects_bad_breaks() {
        assert!(matches!(
            WidthTrajectory::first_order_hold(vec![1.0, 1.0], vec![0.0, 1.0]),
            Err(PickError::InvalidTrajectory(_))
        ));
        assert!(WidthTrajectory::first_order_hold(vec![1.0], vec![0.0]).is_err());
        assert!(WidthTrajectory::first_order_hold(vec![1.0, 2.0], vec![0.0]).is_err());
        assert!(WidthTrajectory::first_order_hold(vec![f64::NAN, 2.0], vec![0.0, 1.0]).is_err());
    }

    #[test]
    fn joint_trajectory_rejects_mixed_dimensions() {
        let err = JointTrajectory::first_order_hold(
            vec![0.0, 1.0],
            vec![DVector::zeros(7), DVector::zeros(6)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn joint_trajectory_midpoint() {
        let traj = JointTrajectory::first_order_hold(
            vec![0.0, 2.0],
            vec![DVector::zeros(3), DVector::from_element(3, 1.0)],
        )
        .unwrap();
        let mid = traj.value(1.0);
        assert!(mid.iter().all(|v| (v - 0.5).abs() < 1e-12));
    }

    #[test]
    fn append_extends_end_time() {
        let mut traj = WidthTrajectory::first_order_hold(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        traj.append(3.0, 0.0).unwrap();
        assert!((traj.end_time() - 3.0).abs() < 1e-12);
        assert!((traj.value(2.0) - 0.5).abs() < 1e-12);
        assert!(traj.append(2.0, 0.0).is_err());
    }

    #[test]
    fn hold_covers_all_later_times() {
        let pose = pose_from_rpy([0.0, 0.0, 0.3], [0.1, 0.2, 0.3]);
        let hold = PoseTrajectory::hold(pose, 5.0);
        assert!(hold.is_time_in_range(5.0));
        assert!(hold.is_time_in_range(1.0e9));
        assert!(!hold.is_time_in_range(4.9));
        let v = hold.value(100.0);
        assert!((v.translation.vector - pose.translation.vector).norm() < 1e-12);
        assert!(v.rotation.angle_to(&pose.rotation) < 1e-12);
    }

    #[test]
    fn pose_trajectory_blends_translation_and_rotation() {
        let a = pose_from_rpy([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let b = pose_from_rpy([0.0, 0.0, FRAC_PI_2], [1.0, 0.0, 0.0]);
        let traj = PoseTrajectory::linear(vec![0.0, 1.0], vec![a, b]).unwrap();
        let mid = traj.value(0.5);
        assert!((mid.translation.vector.x - 0.5).abs() < 1e-12);
        assert!((mid.rotation.angle() - FRAC_PI_2 / 2.0).abs() < 1e-9);
    }
}
