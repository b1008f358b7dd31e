//! Motion-optimizer seam.
//!
//! The optimizer itself is an external collaborator. [`plan_motion`] wraps
//! it with the two-stage solve the planner relies on: a kinematics-only
//! solve first, then a collision-aware solve seeded with that result.

use binpick_types::{PickError, Pose};
use tracing::{instrument, warn};

use crate::trajectory::JointTrajectory;

/// Which constraint set the optimizer should honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraints {
    /// Reach the goal pose; ignore collisions.
    Relaxed,
    /// Reach the goal pose without collisions.
    Full,
}

/// One request to the optimizer.
#[derive(Debug, Clone)]
pub struct MotionRequest<'a> {
    pub start: Pose,
    pub goal: Pose,
    /// The returned trajectory must start at this time.
    pub start_time: f64,
    pub constraints: Constraints,
    /// Initial guess, typically the relaxed solution.
    pub seed: Option<&'a JointTrajectory>,
}

/// Produces a joint trajectory moving the gripper from `start` to `goal`.
pub trait MotionOptimizer: Send {
    /// # Errors
    ///
    /// [`PickError::TrajectoryOptimizationFailed`] when the solver does not
    /// converge.
    fn optimize(&self, request: &MotionRequest<'_>) -> Result<JointTrajectory, PickError>;
}

/// Solve `start → goal` from `start_time`.
///
/// The relaxed solution seeds the full solve and is used on its own if the
/// full solve fails. Errors only when neither converges.
#[instrument(skip(optimizer, start, goal))]
pub fn plan_motion(
    optimizer: &dyn MotionOptimizer,
    start: &Pose,
    goal: &Pose,
    start_time: f64,
) -> Result<JointTrajectory, PickError> {
    let relaxed = optimizer.optimize(&MotionRequest {
        start: *start,
        goal: *goal,
        start_time,
        constraints: Constraints::Relaxed,
        seed: None,
    });
    if let Err(e) = &relaxed {
        warn!(error = %e, "relaxed solve failed; solving with full constraints unseeded");
    }

    let full = optimizer.optimize(&MotionRequest {
        start: *start,
        goal: *goal,
        start_time,
        constraints: Constraints::Full,
        seed: relaxed.as_ref().ok(),
    });

    match (full, relaxed) {
        (Ok(trajectory), _) => Ok(trajectory),
        (Err(e), Ok(seed)) => {
            warn!(error = %e, "full solve failed; using relaxed trajectory");
            Ok(seed)
        }
        (Err(e), Err(_)) => Err(PickError::TrajectoryOptimizationFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use std::sync::Mutex;

    struct Scripted {
        relaxed_ok: bool,
        full_ok: bool,
        seen_seed: Mutex<Option<bool>>,
    }

    impl Scripted {
        fn new(relaxed_ok: bool, full_ok: bool) -> Self {
            Self {
                relaxed_ok,
                full_ok,
                seen_seed: Mutex::new(None),
            }
        }
    }

    impl MotionOptimizer for Scripted {
        fn optimize(&self, request: &MotionRequest<'_>) -> Result<JointTrajectory, PickError> {
            let (ok, end) = match request.constraints {
                Constraints::Relaxed => (self.relaxed_ok, 1.0),
                Constraints::Full => {
                    *self.seen_seed.lock().unwrap() = Some(request.seed.is_some());
                    (self.full_ok, 2.0)
                }
            };
            if !ok {
                return Err(PickError::TrajectoryOptimizationFailed("no convergence".into()));
            }
            JointTrajectory::first_order_hold(
                vec![request.start_time, request.start_time + end],
                vec![DVector::zeros(7), DVector::from_element(7, 1.0)],
            )
        }
    }

    #[test]
    fn full_solve_is_seeded_with_relaxed_solution() {
        let opt = Scripted::new(true, true);
        let traj = plan_motion(&opt, &Pose::identity(), &Pose::identity(), 3.0).unwrap();
        assert!((traj.duration() - 2.0).abs() < 1e-12);
        assert!((traj.start_time() - 3.0).abs() < 1e-12);
        assert_eq!(*opt.seen_seed.lock().unwrap(), Some(true));
    }

    #[test]
    fn falls_back_to_relaxed_when_full_fails() {
        let opt = Scripted::new(true, false);
        let traj = plan_motion(&opt, &Pose::identity(), &Pose::identity(), 0.0).unwrap();
        assert!((traj.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn full_solve_runs_unseeded_when_relaxed_fails() {
        let opt = Scripted::new(false, true);
        let traj = plan_motion(&opt, &Pose::identity(), &Pose::identity(), 0.0).unwrap();
        assert!((traj.duration() - 2.0).abs() < 1e-12);
        assert_eq!(*opt.seen_seed.lock().unwrap(), Some(false));
    }

    #[test]
    fn both_failing_is_an_error() {
        let opt = Scripted::new(false, false);
        let err = plan_motion(&opt, &Pose::identity(), &Pose::identity(), 0.0).unwrap_err();
        assert!(matches!(err, PickError::TrajectoryOptimizationFailed(_)));
        assert!(err.is_retryable());
    }
}
