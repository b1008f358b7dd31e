//! Differential-IK seam.
//!
//! The planner emits a desired gripper pose every tick; a differential-IK
//! controller turns it into the next joint-position command. While the
//! planner is in position control it asks the controller to reset, so the
//! integrator restarts from the measured joints when diff-IK resumes.

use binpick_hal::ArmState;
use binpick_types::Pose;
use nalgebra::DVector;

pub trait DifferentialIk: Send {
    /// Joint positions moving the gripper toward `desired` over `dt`
    /// seconds. With `reset` set, the controller discards its internal
    /// state and re-seeds from `measured`.
    fn solve(&mut self, desired: &Pose, measured: &ArmState, reset: bool, dt: f64) -> DVector<f64>;
}
