//! Antipodal grasp oracle for a parallel-jaw gripper.
//!
//! The gripper frame has its closing axis along +x, its approach axis along
//! +y (palm at the origin, fingertips ~0.11 m ahead) and +z completing the
//! right-handed frame.
//!
//! One proposal:
//!
//! 1. Pick a random cloud point `S` with normal `n`.
//! 2. Align gripper +x with `n`; choose +y as close to world-down as the
//!    constraint allows. Vertical normals are rejected.
//! 3. For each roll about +x in a fixed sweep over `[−π/3, π/3]`, place the
//!    gripper so `S` sits just inside one fingertip, then score it with
//!    [`AntipodalOracle::grasp_cost`]. The first finite score wins.
//!
//! The cost rewards a vertical approach and normals aligned with the
//! closing axis between the fingers:
//!
//! ```text
//! cost = 20 · R_WG[2,1] − Σ_{between fingers} (n_G · x̂)²
//! ```

use binpick_perception::{Aabb, PointCloud};
use binpick_types::{GraspCandidate, Pose};
use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use rand::{Rng, RngCore};
use tracing::trace;

use crate::sampler::{GraspOracle, fallback_pose};

/// Roll sweep, as fractions of the roll range, best-first.
const ROLL_FRACTIONS: [f64; 7] = [0.5, 0.65, 0.35, 0.8, 0.2, 1.0, 0.0];

/// Gripper geometry, all boxes in the gripper frame (metres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperGeometry {
    /// Where the sampled surface point is placed in the gripper frame.
    pub contact_offset: Vector3<f64>,
    /// The volume between the fingertips.
    pub closing_region: Aabb,
    pub left_finger: Aabb,
    pub right_finger: Aabb,
    pub palm: Aabb,
}

impl Default for GripperGeometry {
    fn default() -> Self {
        Self {
            contact_offset: Vector3::new(0.054 - 0.01, 0.10625, 0.0),
            closing_region: Aabb::from_corners(
                Point3::new(-0.05, 0.1, -0.00625),
                Point3::new(0.05, 0.1125, 0.00625),
            ),
            left_finger: Aabb::from_corners(
                Point3::new(-0.0735, 0.03, -0.0125),
                Point3::new(-0.0535, 0.1125, 0.0125),
            ),
            right_finger: Aabb::from_corners(
                Point3::new(0.0535, 0.03, -0.0125),
                Point3::new(0.0735, 0.1125, 0.0125),
            ),
            palm: Aabb::from_corners(Point3::new(-0.0735, -0.02, -0.025), Point3::new(0.0735, 0.03, 0.025)),
        }
    }
}

/// Geometric antipodal oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AntipodalOracle {
    pub geometry: GripperGeometry,
    /// Maximum roll magnitude about the closing axis (radians).
    pub roll_limit: f64,
    /// Weight of the vertical-approach term.
    pub vertical_weight: f64,
}

impl Default for AntipodalOracle {
    fn default() -> Self {
        Self {
            geometry: GripperGeometry::default(),
            roll_limit: std::f64::consts::FRAC_PI_3,
            vertical_weight: 20.0,
        }
    }
}

impl AntipodalOracle {
    /// Score `pose` against `cloud`, first sliding the gripper along its
    /// closing axis to centre it on the points between the fingers.
    ///
    /// Returns the cost and the centred pose. The cost is infinite when a
    /// finger or the palm would intersect the cloud.
    pub fn grasp_cost(&self, cloud: &PointCloud, pose: &Pose) -> (f64, Pose) {
        let g = &self.geometry;
        let to_gripper = pose.inverse();
        let local: Vec<Point3<f64>> = cloud.iter().map(|p| to_gripper * p.position).collect();
        let between: Vec<usize> = local
            .iter()
            .enumerate()
            .filter(|(_, p)| g.closing_region.contains_point(p))
            .map(|(i, _)| i)
            .collect();

        let mut shift = 0.0;
        if !between.is_empty() {
            let (lo, hi) = between
                .iter()
                .map(|&i| local[i].x)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
            shift = (lo + hi) / 2.0;
        }
        let centred = pose * Translation3::new(shift, 0.0, 0.0);
        let offset = Vector3::new(shift, 0.0, 0.0);

        let collides = local.iter().any(|p| {
            let q = p - offset;
            g.left_finger.contains_point(&q) || g.right_finger.contains_point(&q) || g.palm.contains_point(&q)
        });
        if collides {
            return (f64::INFINITY, centred);
        }

        let rotation = centred.rotation.to_rotation_matrix();
        let alignment: f64 = between
            .iter()
            .filter_map(|&i| cloud.points()[i].normal)
            .map(|n| {
                let n_g = rotation.inverse() * n;
                n_g.x * n_g.x
            })
            .sum();
        let cost = self.vertical_weight * rotation.matrix()[(2, 1)] - alignment;
        (cost, centred)
    }
}

impl GraspOracle for AntipodalOracle {
    fn sample(&self, cloud: &PointCloud, rng: &mut dyn RngCore) -> GraspCandidate {
        let fallback = GraspCandidate::infeasible(fallback_pose());
        if cloud.is_empty() {
            return fallback;
        }
        let index = rng.gen_range(0..cloud.len());
        let sample = cloud.points()[index];
        let Some(gx) = sample.normal.and_then(|n| n.try_normalize(1e-9)) else {
            return fallback;
        };

        let down = -Vector3::z();
        if gx.dot(&down).abs() > 1.0 - 1e-6 {
            trace!(index, "normal is vertical");
            return fallback;
        }
        let gy = (down - gx * down.dot(&gx)).normalize();
        let gz = gx.cross(&gy);
        let r_wg = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[gx, gy, gz]));

        for fraction in ROLL_FRACTIONS {
            let theta = -self.roll_limit + 2.0 * self.roll_limit * fraction;
            let r = r_wg * Rotation3::from_axis_angle(&Vector3::x_axis(), theta);
            let origin = sample.position - r * self.geometry.contact_offset;
            let pose = Isometry3::from_parts(
                Translation3::from(origin.coords),
                UnitQuaternion::from_rotation_matrix(&r),
            );
            let (cost, centred) = self.grasp_cost(cloud, &pose);
            if cost.is_finite() {
                return GraspCandidate::new(cost, centred);
            }
        }
        trace!(index, "every roll collides");
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::GraspSampler;
    use binpick_perception::CloudPoint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    /// The four vertical faces of a 6 cm cube resting on z = 0, with outward
    /// normals.
    fn cube_sides() -> PointCloud {
        let h = 0.03;
        let steps = 13;
        let mut pts = Vec::new();
        for a in 0..steps {
            for b in 0..steps {
                let s = -h + 2.0 * h * a as f64 / (steps - 1) as f64;
                let z = 2.0 * h * b as f64 / (steps - 1) as f64;
                for (p, n) in [
                    (Point3::new(h, s, z), Vector3::x()),
                    (Point3::new(-h, s, z), -Vector3::x()),
                    (Point3::new(s, h, z), Vector3::y()),
                    (Point3::new(s, -h, z), -Vector3::y()),
                ] {
                    pts.push(CloudPoint {
                        position: p,
                        normal: Some(n),
                    });
                }
            }
        }
        PointCloud::new(pts)
    }

    fn flat_patch() -> PointCloud {
        PointCloud::new(
            (0..100)
                .map(|i| CloudPoint {
                    position: Point3::new((i % 10) as f64 * 0.01, (i / 10) as f64 * 0.01, 0.0),
                    normal: Some(Vector3::z()),
                })
                .collect(),
        )
    }

    #[test]
    fn side_of_cube_yields_vertical_centred_grasp() {
        let cloud = cube_sides();
        let oracle = AntipodalOracle::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let grasp = oracle.sample(&cloud, &mut rng);

        assert!(grasp.is_feasible());
        assert!(grasp.cost < -20.0, "cost {}", grasp.cost);

        // Approach axis points straight down.
        let y = grasp.pose.rotation * Vector3::y();
        assert!(y.z < -0.999);

        // Centred over the cube along the closing axis.
        let x = grasp.pose.rotation * Vector3::x();
        let along = grasp.pose.translation.vector.dot(&x);
        assert!(along.abs() < 0.01, "offset along closing axis {along}");
    }

    #[test]
    fn vertical_normals_are_rejected() {
        let oracle = AntipodalOracle::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let grasp = oracle.sample(&flat_patch(), &mut rng);
        assert!(!grasp.is_feasible());
        assert_eq!(grasp.pose, fallback_pose());
    }

    #[test]
    fn points_without_normals_are_rejected() {
        let oracle = AntipodalOracle::default();
        let cloud = PointCloud::from_positions(vec![Point3::origin()]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(!oracle.sample(&cloud, &mut rng).is_feasible());
    }

    #[test]
    fn finger_collision_is_infinite() {
        let oracle = AntipodalOracle::default();
        // One point inside the right finger, nothing between the fingers.
        let cloud = PointCloud::from_positions(vec![Point3::new(0.06, 0.05, 0.0)]);
        let (cost, centred) = oracle.grasp_cost(&cloud, &Pose::identity());
        assert!(cost.is_infinite());
        assert_eq!(centred, Pose::identity());
    }

    #[test]
    fn cost_rewards_alignment_and_vertical_approach() {
        let oracle = AntipodalOracle::default();
        let cloud = PointCloud::new(vec![
            CloudPoint {
                position: Point3::new(0.03, 0.105, 0.0),
                normal: Some(Vector3::x()),
            },
            CloudPoint {
                position: Point3::new(-0.01, 0.105, 0.0),
                normal: Some(-Vector3::x()),
            },
        ]);
        let (cost, centred) = oracle.grasp_cost(&cloud, &Pose::identity());
        // Identity rotation: R[2,1] = 0, two aligned normals.
        assert!((cost + 2.0).abs() < 1e-12);
        assert!((centred.translation.vector.x - 0.01).abs() < 1e-12);
    }

    #[test]
    fn sampler_with_antipodal_oracle_finds_cube_grasp() {
        let mut sampler = GraspSampler::new(Arc::new(AntipodalOracle::default()), 11);
        let grasp = sampler.select_grasp(&cube_sides(), 20);
        assert!(grasp.is_feasible());
    }
}
