//! In-process simulation rig for headless runs and tests.
//!
//! [`SimRigBuilder`] assembles a box-on-a-table [`SimScene`], a set of
//! ray-cast RGB-D [`SimCamera`]s watching the source bin, and a [`SimArm`]:
//! a 7-joint Cartesian gantry stand-in whose first six joints are the
//! gripper's `x, y, z, roll, pitch, yaw` and whose seventh joint is unused.
//! The arm grasps the box when its fingers close around it and drops it
//! straight down when they open again.
//!
//! # Example
//!
//! ```rust
//! use binpick_hal::sim::SimRigBuilder;
//! use binpick_hal::{Arm, Camera};
//! use nalgebra::Point3;
//!
//! let mut rig = SimRigBuilder::new()
//!     .with_camera("camera0", Point3::new(0.4, -0.6, 0.45))
//!     .build();
//!
//! let frame = rig.cameras[0].capture().expect("sim capture must succeed");
//! assert!(!frame.points.is_empty());
//! assert_eq!(rig.arm.state().joints.len(), 7);
//! ```

use std::f64::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex, MutexGuard};

use binpick_types::{PickError, Pose, pose_from_rpy};
use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use tracing::{debug, info};

use crate::arm::{Arm, ArmState, JOINT_COUNT};
use crate::camera::{Camera, CameraIntrinsics, DepthImage, RgbImage, RgbdFrame};

/// Distance from the gripper body origin to the fingertip centre, along the
/// gripper's +y (approach) axis.
pub const FINGERTIP_OFFSET: f64 = 0.10625;

const GRASP_TOLERANCE: f64 = 0.05;
const MAX_RANGE: f64 = 3.0;
const OBJECT_RGB: [u8; 3] = [200, 40, 40];
const TABLE_RGB: [u8; 3] = [110, 110, 110];

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned box resting in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub center: Point3<f64>,
    pub half_extents: Vector3<f64>,
}

impl SimObject {
    pub fn min(&self) -> Point3<f64> {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Point3<f64> {
        self.center + self.half_extents
    }

    /// Finger separation when the box is held across its narrow side.
    pub fn grasp_width(&self) -> f64 {
        2.0 * self.half_extents.x.min(self.half_extents.y)
    }
}

/// The simulated world: one box, a table plane, and the source-bin region
/// the cameras watch.
#[derive(Debug, Clone, PartialEq)]
pub struct SimScene {
    pub object: SimObject,
    pub table_z: f64,
    /// `[x, y]` lower corner of the source bin.
    pub source_min: [f64; 2],
    /// `[x, y]` upper corner of the source bin.
    pub source_max: [f64; 2],
    pub held: bool,
}

impl SimScene {
    /// `true` while the box sits inside the source bin's footprint.
    pub fn in_source_bin(&self) -> bool {
        let c = self.object.center;
        c.x >= self.source_min[0]
            && c.x <= self.source_max[0]
            && c.y >= self.source_min[1]
            && c.y <= self.source_max[1]
    }
}

impl Default for SimScene {
    fn default() -> Self {
        Self {
            object: SimObject {
                center: Point3::new(0.0, -0.6, 0.03),
                half_extents: Vector3::new(0.03, 0.03, 0.03),
            },
            table_z: 0.0,
            source_min: [-0.2, -0.8],
            source_max: [0.2, -0.4],
            held: false,
        }
    }
}

/// Scene handle shared by the cameras and the arm.
pub type SharedScene = Arc<Mutex<SimScene>>;

fn lock(scene: &SharedScene) -> MutexGuard<'_, SimScene> {
    scene.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Gantry kinematics
// ────────────────────────────────────────────────────────────────────────────

/// Forward kinematics of the gantry: joints → gripper pose.
pub fn gantry_pose(joints: &DVector<f64>) -> Pose {
    let q = |i: usize| joints.get(i).copied().unwrap_or(0.0);
    Isometry3::from_parts(
        Translation3::new(q(0), q(1), q(2)),
        UnitQuaternion::from_euler_angles(q(3), q(4), q(5)),
    )
}

/// Inverse kinematics of the gantry: gripper pose → joints.
pub fn gantry_joints(pose: &Pose) -> DVector<f64> {
    let (roll, pitch, yaw) = pose.rotation.euler_angles();
    let t = pose.translation.vector;
    DVector::from_vec(vec![t.x, t.y, t.z, roll, pitch, yaw, 0.0])
}

/// Intrinsics used by [`SimRigBuilder`] unless overridden.
pub fn default_intrinsics() -> CameraIntrinsics {
    CameraIntrinsics {
        width: 128,
        height: 96,
        fx: 110.0,
        fy: 110.0,
        cx: 64.0,
        cy: 48.0,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// A ray-cast RGB-D camera. Renders the box only while it is in the source
/// bin.
pub struct SimCamera {
    id: String,
    scene: SharedScene,
    pose: Pose,
    intrinsics: CameraIntrinsics,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, scene: SharedScene, pose: Pose, intrinsics: CameraIntrinsics) -> Self {
        Self {
            id: id.into(),
            scene,
            pose,
            intrinsics,
        }
    }

    /// A camera at `eye` whose optical axis points at `target`. The view
    /// direction must not be vertical.
    pub fn looking_at(
        id: impl Into<String>,
        scene: SharedScene,
        eye: Point3<f64>,
        target: Point3<f64>,
        intrinsics: CameraIntrinsics,
    ) -> Self {
        let pose = Isometry3::face_towards(&eye, &target, &Vector3::z());
        Self::new(id, scene, pose, intrinsics)
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    fn render(&self) -> RgbdFrame {
        let scene = lock(&self.scene).clone();
        let visible = scene.in_source_bin();
        let (box_min, box_max) = (scene.object.min(), scene.object.max());
        let origin = Point3::from(self.pose.translation.vector);

        let n = (self.intrinsics.width * self.intrinsics.height) as usize;
        let mut rgb = Vec::with_capacity(n);
        let mut depth = Vec::with_capacity(n);
        let mut points = Vec::with_capacity(n);

        for v in 0..self.intrinsics.height {
            for u in 0..self.intrinsics.width {
                // Unit camera-frame depth, so the ray parameter is the depth.
                let ray_c = self.intrinsics.back_project(u as f64, v as f64, 1.0).coords;
                let ray_w = self.pose.rotation * ray_c;

                let hit_box = if visible {
                    ray_aabb(&origin, &ray_w, &box_min, &box_max)
                } else {
                    None
                };
                let hit_table = (ray_w.z < -1e-12)
                    .then(|| (scene.table_z - origin.z) / ray_w.z)
                    .filter(|t| *t > 0.0);

                let hit = match (hit_box, hit_table) {
                    (Some(b), Some(t)) if b <= t => Some((b, OBJECT_RGB)),
                    (Some(b), None) => Some((b, OBJECT_RGB)),
                    (_, Some(t)) => Some((t, TABLE_RGB)),
                    (None, None) => None,
                };

                match hit.filter(|(t, _)| *t <= MAX_RANGE) {
                    Some((t, color)) => {
                        depth.push(t as f32);
                        rgb.push(color);
                        points.push(origin + ray_w * t);
                    }
                    None => {
                        depth.push(f32::INFINITY);
                        rgb.push([0, 0, 0]);
                    }
                }
            }
        }

        RgbdFrame {
            rgb: RgbImage {
                width: self.intrinsics.width,
                height: self.intrinsics.height,
                data: rgb,
            },
            depth: DepthImage {
                width: self.intrinsics.width,
                height: self.intrinsics.height,
                data: depth,
            },
            intrinsics: self.intrinsics,
            pose: self.pose,
            points,
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<RgbdFrame, PickError> {
        let frame = self.render();
        debug!(camera = %self.id, points = frame.points.len(), "sim frame rendered");
        Ok(frame)
    }
}

/// Slab-method ray/box intersection; returns the entry parameter.
fn ray_aabb(origin: &Point3<f64>, dir: &Vector3<f64>, min: &Point3<f64>, max: &Point3<f64>) -> Option<f64> {
    let mut t_near = f64::NEG_INFINITY;
    let mut t_far = f64::INFINITY;
    for i in 0..3 {
        if dir[i].abs() < 1e-12 {
            if origin[i] < min[i] || origin[i] > max[i] {
                return None;
            }
            continue;
        }
        let t1 = (min[i] - origin[i]) / dir[i];
        let t2 = (max[i] - origin[i]) / dir[i];
        t_near = t_near.max(t1.min(t2));
        t_far = t_far.min(t1.max(t2));
    }
    (t_near <= t_far && t_near > 0.0).then_some(t_near)
}

// ────────────────────────────────────────────────────────────────────────────
// Arm
// ────────────────────────────────────────────────────────────────────────────

/// Kinematic gantry arm. Joint commands are reached instantly.
pub struct SimArm {
    id: String,
    scene: SharedScene,
    joints: DVector<f64>,
    gripper_width: f64,
}

impl SimArm {
    pub fn new(scene: SharedScene, home: &Pose, gripper_width: f64) -> Self {
        Self {
            id: "sim_gantry".to_string(),
            scene,
            joints: gantry_joints(home),
            gripper_width,
        }
    }
}

impl Arm for SimArm {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ArmState {
        ArmState {
            joints: self.joints.clone(),
            gripper_width: self.gripper_width,
            gripper_pose: gantry_pose(&self.joints),
        }
    }

    fn command(&mut self, joints: &DVector<f64>, gripper_width: f64) -> Result<(), PickError> {
        if joints.len() != JOINT_COUNT {
            return Err(PickError::HardwareFault {
                component: self.id.clone(),
                details: format!("expected {JOINT_COUNT} joints, got {}", joints.len()),
            });
        }
        if !gripper_width.is_finite() || joints.iter().any(|q| !q.is_finite()) {
            return Err(PickError::HardwareFault {
                component: self.id.clone(),
                details: "non-finite command".to_string(),
            });
        }

        self.joints = joints.clone();
        let fingertip = gantry_pose(&self.joints) * Point3::new(0.0, FINGERTIP_OFFSET, 0.0);

        let mut scene = lock(&self.scene);
        let object_width = scene.object.grasp_width();
        if scene.held {
            if gripper_width >= object_width {
                scene.held = false;
                let rest_z = scene.table_z + scene.object.half_extents.z;
                scene.object.center = Point3::new(fingertip.x, fingertip.y, rest_z);
                info!(x = fingertip.x, y = fingertip.y, "sim object released");
                self.gripper_width = gripper_width;
            } else {
                scene.object.center = fingertip;
                self.gripper_width = object_width;
            }
        } else if gripper_width < object_width
            && gripper_width < self.gripper_width
            && (fingertip - scene.object.center).norm() < GRASP_TOLERANCE
        {
            scene.held = true;
            self.gripper_width = object_width;
            info!("sim object grasped");
        } else {
            self.gripper_width = gripper_width;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRigBuilder
// ────────────────────────────────────────────────────────────────────────────

/// A fully assembled simulation rig.
pub struct SimRig {
    pub cameras: Vec<Box<dyn Camera>>,
    pub arm: SimArm,
    pub scene: SharedScene,
}

/// Builder for a [`SimRig`]. Cameras always aim at the box's starting
/// position.
pub struct SimRigBuilder {
    scene: SimScene,
    intrinsics: CameraIntrinsics,
    eyes: Vec<(String, Point3<f64>)>,
    home: Pose,
    gripper_width: f64,
}

impl SimRigBuilder {
    pub fn new() -> Self {
        Self {
            scene: SimScene::default(),
            intrinsics: default_intrinsics(),
            eyes: Vec::new(),
            home: pose_from_rpy([-FRAC_PI_2, 0.0, FRAC_PI_2], [0.0, -0.3, 0.45]),
            gripper_width: 0.107,
        }
    }

    pub fn with_scene(mut self, scene: SimScene) -> Self {
        self.scene = scene;
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    /// Add a camera at `eye` aimed at the box.
    pub fn with_camera(mut self, id: impl Into<String>, eye: Point3<f64>) -> Self {
        self.eyes.push((id.into(), eye));
        self
    }

    /// Three cameras around the source bin.
    pub fn with_default_cameras(self) -> Self {
        self.with_camera("camera0", Point3::new(0.45, -0.6, 0.45))
            .with_camera("camera1", Point3::new(-0.45, -0.55, 0.45))
            .with_camera("camera2", Point3::new(0.05, -1.05, 0.45))
    }

    /// Starting gripper pose of the arm.
    pub fn with_home(mut self, home: Pose) -> Self {
        self.home = home;
        self
    }

    pub fn build(self) -> SimRig {
        let target = self.scene.object.center;
        let scene: SharedScene = Arc::new(Mutex::new(self.scene));
        let cameras = self
            .eyes
            .into_iter()
            .map(|(id, eye)| {
                Box::new(SimCamera::looking_at(id, scene.clone(), eye, target, self.intrinsics))
                    as Box<dyn Camera>
            })
            .collect();
        let arm = SimArm::new(scene.clone(), &self.home, self.gripper_width);
        SimRig { cameras, arm, scene }
    }
}

impl Default for SimRigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
