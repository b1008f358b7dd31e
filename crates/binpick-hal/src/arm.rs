//! Generic `Arm` trait: a jointed manipulator with a parallel-jaw gripper.
//!
//! The planner reads an [`ArmState`] every tick and the driving loop writes
//! back one joint-position vector and one gripper width.

use binpick_types::{PickError, Pose};
use nalgebra::DVector;

/// Number of arm joints.
pub const JOINT_COUNT: usize = 7;

/// A measured snapshot of the arm.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmState {
    /// Measured joint positions (`JOINT_COUNT` entries).
    pub joints: DVector<f64>,
    /// Measured finger separation in metres.
    pub gripper_width: f64,
    /// Measured gripper body pose in the world frame.
    pub gripper_pose: Pose,
}

/// A position-controlled arm with a gripper.
pub trait Arm: Send {
    /// Stable identifier, e.g. `"iiwa"`.
    fn id(&self) -> &str;

    /// Return the most recently measured state.
    fn state(&self) -> ArmState;

    /// Command joint positions and a gripper width.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::HardwareFault`] if the command cannot be applied,
    /// e.g. the joint vector has the wrong length.
    fn command(&mut self, joints: &DVector<f64>, gripper_width: f64) -> Result<(), PickError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockArm {
        state: ArmState,
    }

    impl Arm for MockArm {
        fn id(&self) -> &str {
            "mock"
        }

        fn state(&self) -> ArmState {
            self.state.clone()
        }

        fn command(&mut self, joints: &DVector<f64>, gripper_width: f64) -> Result<(), PickError> {
            if joints.len() != JOINT_COUNT {
                return Err(PickError::HardwareFault {
                    component: self.id().to_string(),
                    details: format!("expected {JOINT_COUNT} joints, got {}", joints.len()),
                });
            }
            self.state.joints = joints.clone();
            self.state.gripper_width = gripper_width;
            Ok(())
        }
    }

    #[test]
    fn mock_arm_records_command() {
        let mut arm = MockArm {
            state: ArmState {
                joints: DVector::zeros(JOINT_COUNT),
                gripper_width: 0.0,
                gripper_pose: Pose::identity(),
            },
        };
        arm.command(&DVector::from_element(JOINT_COUNT, 0.3), 0.107).unwrap();
        assert!((arm.state().joints[6] - 0.3).abs() < 1e-12);
        assert!((arm.state().gripper_width - 0.107).abs() < 1e-12);
    }

    #[test]
    fn mock_arm_rejects_wrong_dimension() {
        let mut arm = MockArm {
            state: ArmState {
                joints: DVector::zeros(JOINT_COUNT),
                gripper_width: 0.0,
                gripper_pose: Pose::identity(),
            },
        };
        let err = arm.command(&DVector::zeros(3), 0.0).unwrap_err();
        assert!(matches!(err, PickError::HardwareFault { .. }));
    }
}
