//! `binpick-grasp` – choosing where to put the gripper.
//!
//! # Modules
//!
//! - [`sampler`] – [`GraspSampler`]: runs independent, seeded
//!   [`GraspOracle`] trials in parallel and keeps the cheapest finite one.
//! - [`antipodal`] – [`AntipodalOracle`]: a geometric oracle that lines the
//!   fingers up with sampled surface normals.

pub mod antipodal;
pub mod sampler;

pub use antipodal::{AntipodalOracle, GripperGeometry};
pub use sampler::{GraspOracle, GraspSampler, SamplerParams, fallback_pose};
