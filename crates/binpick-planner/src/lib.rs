//! `binpick-planner` – deciding what the arm does each tick.
//!
//! # Modules
//!
//! - [`task`] – [`TaskPlanner`]: the `WAIT_FOR_SETTLE` / `PICK_TRAJOPT` /
//!   `PICK_DIFFIK` / `GO_HOME` state machine and its per-tick outputs.
//! - [`keyframes`] – the ten gripper keyframes of one cycle and their
//!   [`Timeline`].
//! - [`trajectory`] – piecewise-linear joint, width and pose trajectories.
//! - [`motion`] – the [`MotionOptimizer`] seam and the relaxed-then-full
//!   [`plan_motion`] solve.
//! - [`attempts`] – [`AttemptCounter`] for bounded pick retries.
//! - [`switch`] – [`MotionModeSwitch`], routing one of two joint commands.
//! - [`config`] – [`PlannerConfig`].

pub mod attempts;
pub mod config;
pub mod keyframes;
pub mod motion;
pub mod switch;
pub mod task;
pub mod trajectory;

pub use attempts::{AttemptCounter, AttemptOutcome};
pub use config::PlannerConfig;
pub use keyframes::{Keyframes, Timeline, gripper_command_trajectory, make_gripper_frames};
pub use motion::{Constraints, MotionOptimizer, MotionRequest, plan_motion};
pub use switch::MotionModeSwitch;
pub use task::{GraspSource, PlannerCommands, PlannerState, TaskPlanner, TaskStatus, TickReport, Transition};
pub use trajectory::{Interpolate, JointTrajectory, PiecewiseLinear, PoseTrajectory, WidthTrajectory};
