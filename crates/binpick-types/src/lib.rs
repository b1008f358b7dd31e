//! Shared vocabulary for the bin-picking decision core.
//!
//! Every other `binpick-*` crate speaks in these types: rigid [`Pose`]s,
//! scored [`GraspCandidate`]s, the planner's [`PlannerMode`], the
//! visualization [`Marker`]s routed over the event bus, and the single
//! [`PickError`] taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A rigid transform (rotation + translation) in the world frame, in metres.
pub type Pose = Isometry3<f64>;

/// Build a [`Pose`] from roll/pitch/yaw angles (radians, applied as
/// `Rz(yaw) · Ry(pitch) · Rx(roll)`) and a translation.
pub fn pose_from_rpy(rpy: [f64; 3], xyz: [f64; 3]) -> Pose {
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Grasps
// ────────────────────────────────────────────────────────────────────────────

/// A scored gripper pose. Lower cost is better; an infinite cost marks an
/// infeasible candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraspCandidate {
    pub cost: f64,
    pub pose: Pose,
}

impl GraspCandidate {
    pub fn new(cost: f64, pose: Pose) -> Self {
        Self { cost, pose }
    }

    /// An infeasible candidate carrying `pose` as a placeholder.
    pub fn infeasible(pose: Pose) -> Self {
        Self {
            cost: f64::INFINITY,
            pose,
        }
    }

    /// `true` when the cost is finite.
    pub fn is_feasible(&self) -> bool {
        self.cost.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Planner modes
// ────────────────────────────────────────────────────────────────────────────

/// The task planner's operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerMode {
    /// Idle until the scene has been still for the settle time, then plan.
    WaitForSettle,
    /// Follow the gripper pose trajectory through differential IK.
    PickDiffIk,
    /// Follow an optimized joint trajectory in position control.
    PickTrajopt,
    /// Recover by driving the joints back to the home configuration.
    GoHome,
}

impl fmt::Display for PlannerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitForSettle => "WAIT_FOR_SETTLE",
            Self::PickDiffIk => "PICK_DIFFIK",
            Self::PickTrajopt => "PICK_TRAJOPT",
            Self::GoHome => "GO_HOME",
        };
        f.write_str(name)
    }
}

/// Which upstream source drives the arm's joint-position command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSource {
    /// The differential-IK controller tracking the commanded gripper pose.
    DiffIk,
    /// The planner's joint-position trajectory.
    Position,
}

impl fmt::Display for ControlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiffIk => f.write_str("diff_ik"),
            Self::Position => f.write_str("position"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Visualization markers
// ────────────────────────────────────────────────────────────────────────────

/// A named debug marker for an external 3-D viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Hierarchical path, e.g. `"place/corner_0"`.
    pub name: String,
    pub shape: MarkerShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerShape {
    /// Coordinate axes drawn at `pose`.
    Triad { pose: Pose, length: f64, radius: f64 },
    /// A coloured sphere.
    Sphere {
        center: [f64; 3],
        radius: f64,
        rgba: [f32; 4],
    },
}

impl Marker {
    pub fn triad(name: impl Into<String>, pose: Pose) -> Self {
        Self {
            name: name.into(),
            shape: MarkerShape::Triad {
                pose,
                length: 0.1,
                radius: 0.004,
            },
        }
    }

    pub fn sphere(name: impl Into<String>, center: [f64; 3], radius: f64, rgba: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            shape: MarkerShape::Sphere {
                center,
                radius,
                rgba,
            },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "binpick-planner::task"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Debug geometry for the viewer.
    Markers(Vec<Marker>),
    /// The planner switched modes at simulation time `at` (seconds).
    ModeChanged {
        from: PlannerMode,
        to: PlannerMode,
        at: f64,
    },
    /// A grasp was chosen for the next pick.
    GraspSelected { cost: f64, pose: Pose },
    /// The task reached a terminal failure.
    TaskFailed(PickError),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning perception, grasp selection, planning, and
/// hardware faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PickError {
    #[error("No target detected for prompt '{prompt}'")]
    NoTargetDetected { prompt: String },

    #[error("Degenerate region on axis {axis}: lower {lower} > upper {upper}")]
    RegionDegenerate { axis: char, lower: f64, upper: f64 },

    #[error("Insufficient point data after cropping")]
    InsufficientPointData,

    #[error("No feasible grasp found ({attempts} attempts)")]
    GraspNotFound { attempts: u32 },

    #[error("Grasp search exhausted after {attempts} attempts")]
    GraspExhausted { attempts: u32 },

    #[error("Trajectory optimization failed: {0}")]
    TrajectoryOptimizationFailed(String),

    #[error("Invalid trajectory: {0}")]
    InvalidTrajectory(String),

    #[error("Tracking divergence of {error_m:.3} m")]
    TrackingDivergence { error_m: f64 },

    #[error("Gripper lost the object too many times ({attempts} attempts)")]
    GripperLostObject { attempts: u32 },

    #[error("Invalid sensor data: {0}")]
    InvalidSensorData(String),

    #[error("Missing command: {0}")]
    MissingCommand(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl PickError {
    /// `true` for transient conditions that the planner recovers from by
    /// retrying; `false` for terminal conditions and hard faults.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoTargetDetected { .. }
                | Self::InsufficientPointData
                | Self::GraspNotFound { .. }
                | Self::TrajectoryOptimizationFailed(_)
                | Self::TrackingDivergence { .. }
        )
    }

    /// `true` for conditions that point at broken hardware, bad inputs or a
    /// misconfigured rig rather than at the task itself. A run that ends on
    /// one of these is a fault, not a failed pick.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::RegionDegenerate { .. }
                | Self::InvalidTrajectory(_)
                | Self::InvalidSensorData(_)
                | Self::MissingCommand(_)
                | Self::HardwareFault { .. }
                | Self::Channel(_)
                | Self::InvalidConfiguration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn pose_from_rpy_matches_fixed_axis_convention() {
        let pose = pose_from_rpy([-FRAC_PI_2, 0.0, FRAC_PI_2], [0.5, 0.0, 0.22]);
        let r = pose.rotation.to_rotation_matrix();
        // Rz(π/2)·Rx(−π/2): gripper y maps to world −z.
        let y = r * nalgebra::Vector3::y();
        assert!((y.z + 1.0).abs() < 1e-9);
        assert!((pose.translation.vector.x - 0.5).abs() < 1e-12);
        assert!((pose.translation.vector.z - 0.22).abs() < 1e-12);
    }

    #[test]
    fn infinite_cost_is_infeasible() {
        let c = GraspCandidate::infeasible(Pose::identity());
        assert!(!c.is_feasible());
        assert!(GraspCandidate::new(-3.0, Pose::identity()).is_feasible());
        assert!(!GraspCandidate::new(f64::NAN, Pose::identity()).is_feasible());
    }

    #[test]
    fn planner_mode_display_and_serde() {
        assert_eq!(PlannerMode::PickDiffIk.to_string(), "PICK_DIFFIK");
        let json = serde_json::to_string(&PlannerMode::WaitForSettle).unwrap();
        assert_eq!(json, "\"WAIT_FOR_SETTLE\"");
        let back: PlannerMode = serde_json::from_str("\"GO_HOME\"").unwrap();
        assert_eq!(back, PlannerMode::GoHome);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "binpick-planner::task",
            EventPayload::ModeChanged {
                from: PlannerMode::WaitForSettle,
                to: PlannerMode::PickTrajopt,
                at: 1.1,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert!(matches!(
            back.payload,
            EventPayload::ModeChanged {
                to: PlannerMode::PickTrajopt,
                ..
            }
        ));
    }

    #[test]
    fn marker_serializes_with_kind_tag() {
        let m = Marker::sphere("pick/corner_0", [0.0, 0.1, 0.2], 0.01, [1.0, 0.0, 1.0, 1.0]);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"kind\":\"sphere\""));
    }

    #[test]
    fn retryable_classification() {
        assert!(
            PickError::NoTargetDetected {
                prompt: "cup".to_string()
            }
            .is_retryable()
        );
        assert!(PickError::InsufficientPointData.is_retryable());
        assert!(!PickError::GraspExhausted { attempts: 5 }.is_retryable());
        assert!(!PickError::GripperLostObject { attempts: 6 }.is_retryable());
    }

    #[test]
    fn fault_classification() {
        assert!(
            PickError::HardwareFault {
                component: "camera0".to_string(),
                details: "no frame".to_string(),
            }
            .is_fault()
        );
        assert!(PickError::InvalidConfiguration("home".to_string()).is_fault());
        assert!(
            PickError::RegionDegenerate {
                axis: 'x',
                lower: 1.0,
                upper: 0.0,
            }
            .is_fault()
        );
        assert!(!PickError::GraspExhausted { attempts: 5 }.is_fault());
        assert!(!PickError::NoTargetDetected { prompt: "box".to_string() }.is_fault());
        assert!(!PickError::GripperLostObject { attempts: 6 }.is_fault());
    }

    #[test]
    fn pick_error_display() {
        let err = PickError::RegionDegenerate {
            axis: 'z',
            lower: 0.3,
            upper: 0.1,
        };
        assert!(err.to_string().contains("axis z"));

        let err2 = PickError::HardwareFault {
            component: "gripper".to_string(),
            details: "stalled".to_string(),
        };
        assert!(err2.to_string().contains("gripper"));
    }
}
