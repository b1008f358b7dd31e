//! `binpick-hal` – sensor and actuator seams.
//!
//! The decision core only ever talks to the [`Camera`] and [`Arm`] traits,
//! so real drivers and the in-process [`sim`] rig are interchangeable.
//!
//! # Modules
//!
//! - [`camera`] – RGB-D frames, pinhole intrinsics, and the `Camera` trait.
//! - [`arm`] – Measured arm state and the `Arm` command trait.
//! - [`sim`] – Box-on-a-table scene, ray-cast cameras, and a Cartesian
//!   gantry arm for headless runs.

pub mod arm;
pub mod camera;
pub mod sim;

pub use arm::{Arm, ArmState, JOINT_COUNT};
pub use camera::{Camera, CameraIntrinsics, DepthImage, RgbImage, RgbdFrame};
