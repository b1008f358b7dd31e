//! `binpick-runtime` – the driving loop and the pieces it wires together.
//!
//! # Modules
//!
//! - [`pick_loop`] – [`PickLoop`][pick_loop::PickLoop]: steps a simulated
//!   clock, ticks the [`TaskPlanner`][binpick_planner::TaskPlanner], routes
//!   its commands through the
//!   [`MotionModeSwitch`][binpick_planner::MotionModeSwitch] and sends the
//!   result to the arm.
//! - [`grasp_source`] –
//!   [`PerceptionGraspSource`][grasp_source::PerceptionGraspSource]: cameras,
//!   segmentation, region of interest, cloud fusion and grasp sampling behind
//!   the planner's [`GraspSource`][binpick_planner::GraspSource] seam.
//! - [`control`] – the [`DifferentialIk`][control::DifferentialIk] seam.
//! - [`sim`] – simulation collaborators for headless runs: a colour
//!   segmenter, a gantry motion optimizer and a rate-limited gantry
//!   differential-IK controller.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter. Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export spans.

pub mod control;
pub mod grasp_source;
pub mod pick_loop;
pub mod sim;
pub mod telemetry;

pub use control::DifferentialIk;
pub use grasp_source::{PerceptionGraspSource, PerceptionParams};
pub use pick_loop::{LoopConfig, PickLoop, RunOutcome, RunSummary};
pub use sim::{ColorSegmenter, GantryDiffIk, GantryOptimizer};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
