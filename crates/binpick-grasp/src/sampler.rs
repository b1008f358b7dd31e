//! Parallel best-of-N grasp selection.
//!
//! Each trial gets its own [`ChaCha8Rng`], seeded from the sampler's master
//! generator before any trial starts. Trials then run on the rayon pool with
//! no shared mutable state, so the selected grasp depends only on the master
//! seed and the cloud, never on scheduling.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use binpick_grasp::{AntipodalOracle, GraspSampler};
//! use binpick_perception::PointCloud;
//!
//! let mut sampler = GraspSampler::new(Arc::new(AntipodalOracle::default()), 7);
//! let grasp = sampler.select_grasp(&PointCloud::default(), 10);
//! assert!(!grasp.is_feasible());
//! ```

use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use binpick_perception::PointCloud;
use binpick_types::{GraspCandidate, Pose, pose_from_rpy};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Placeholder pose returned with an infinite cost when no trial succeeds.
pub fn fallback_pose() -> Pose {
    pose_from_rpy([-FRAC_PI_2, 0.0, FRAC_PI_2], [0.5, 0.0, 0.22])
}

/// Proposes and scores one grasp per call.
///
/// Implementations must draw all randomness from `rng` and return an
/// infinite cost for infeasible proposals.
pub trait GraspOracle: Send + Sync {
    fn sample(&self, cloud: &PointCloud, rng: &mut dyn RngCore) -> GraspCandidate;
}

/// Sampler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerParams {
    /// Trials per [`GraspSampler::select_grasp`] call.
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Master seed; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_trials() -> usize {
    100
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            seed: None,
        }
    }
}

/// Best-of-N grasp sampler.
pub struct GraspSampler {
    oracle: Arc<dyn GraspOracle>,
    rng: ChaCha8Rng,
}

impl GraspSampler {
    pub fn new(oracle: Arc<dyn GraspOracle>, seed: u64) -> Self {
        Self {
            oracle,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_params(oracle: Arc<dyn GraspOracle>, params: &SamplerParams) -> Self {
        let rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { oracle, rng }
    }

    /// Run `max_attempts` independent trials and return the lowest finite
    /// cost, earliest trial on ties. With no finite trial (or an empty
    /// cloud) returns `(+∞, fallback_pose())`.
    #[instrument(skip_all, fields(points = cloud.len(), max_attempts))]
    pub fn select_grasp(&mut self, cloud: &PointCloud, max_attempts: usize) -> GraspCandidate {
        if cloud.is_empty() || max_attempts == 0 {
            debug!("nothing to sample");
            return GraspCandidate::infeasible(fallback_pose());
        }

        let seeds: Vec<u64> = (0..max_attempts).map(|_| self.rng.next_u64()).collect();
        let oracle = &self.oracle;
        let trials: Vec<GraspCandidate> = seeds
            .par_iter()
            .map(|&seed| oracle.sample(cloud, &mut ChaCha8Rng::seed_from_u64(seed)))
            .collect();

        let feasible = trials.iter().filter(|c| c.is_feasible()).count();
        let best = trials
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_feasible())
            .min_by(|a, b| a.1.cost.total_cmp(&b.1.cost).then(a.0.cmp(&b.0)));

        match best {
            Some((trial, candidate)) => {
                info!(cost = candidate.cost, trial, feasible, "grasp selected");
                *candidate
            }
            None => {
                debug!("no feasible trial");
                GraspCandidate::infeasible(fallback_pose())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cost is the trial's first random draw (scaled).
    struct DrawCost;

    impl GraspOracle for DrawCost {
        fn sample(&self, _cloud: &PointCloud, rng: &mut dyn RngCore) -> GraspCandidate {
            GraspCandidate::new((rng.next_u64() >> 40) as f64, Pose::identity())
        }
    }

    /// Odd draws are infeasible.
    struct OddInfeasible;

    impl GraspOracle for OddInfeasible {
        fn sample(&self, _cloud: &PointCloud, rng: &mut dyn RngCore) -> GraspCandidate {
            let v = rng.next_u64() >> 40;
            if v % 2 == 1 {
                GraspCandidate::infeasible(Pose::identity())
            } else {
                GraspCandidate::new(v as f64, Pose::identity())
            }
        }
    }

    struct Counting(AtomicUsize);

    impl GraspOracle for Counting {
        fn sample(&self, _cloud: &PointCloud, _rng: &mut dyn RngCore) -> GraspCandidate {
            self.0.fetch_add(1, Ordering::SeqCst);
            GraspCandidate::infeasible(Pose::identity())
        }
    }

    /// The first call is infeasible, every later call costs 0.3 at `pose`.
    struct OneMiss {
        calls: AtomicUsize,
        pose: Pose,
    }

    impl GraspOracle for OneMiss {
        fn sample(&self, _cloud: &PointCloud, _rng: &mut dyn RngCore) -> GraspCandidate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                GraspCandidate::infeasible(Pose::identity())
            } else {
                GraspCandidate::new(0.3, self.pose)
            }
        }
    }

    fn cloud() -> PointCloud {
        PointCloud::from_positions(vec![Point3::origin()])
    }

    fn expected_draws(seed: u64, n: usize) -> Vec<u64> {
        let mut master = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| master.next_u64())
            .map(|s| ChaCha8Rng::seed_from_u64(s).next_u64() >> 40)
            .collect()
    }

    #[test]
    fn picks_minimum_cost_trial() {
        let mut sampler = GraspSampler::new(Arc::new(DrawCost), 42);
        let grasp = sampler.select_grasp(&cloud(), 16);
        let min = expected_draws(42, 16).into_iter().min().unwrap();
        assert_eq!(grasp.cost, min as f64);
    }

    #[test]
    fn same_seed_same_result() {
        let mut a = GraspSampler::new(Arc::new(DrawCost), 9);
        let mut b = GraspSampler::new(Arc::new(DrawCost), 9);
        assert_eq!(a.select_grasp(&cloud(), 32), b.select_grasp(&cloud(), 32));
        // Successive calls advance the master stream.
        assert_eq!(a.select_grasp(&cloud(), 32), b.select_grasp(&cloud(), 32));
    }

    #[test]
    fn infinite_costs_never_win() {
        let mut sampler = GraspSampler::new(Arc::new(OddInfeasible), 3);
        let grasp = sampler.select_grasp(&cloud(), 64);
        assert!(grasp.is_feasible());
        assert_eq!(grasp.cost as u64 % 2, 0);
        let min_even = expected_draws(3, 64).into_iter().filter(|v| v % 2 == 0).min().unwrap();
        assert_eq!(grasp.cost, min_even as f64);
    }

    #[test]
    fn feasible_trial_beats_an_infeasible_one() {
        let pose = pose_from_rpy([-FRAC_PI_2, 0.0, FRAC_PI_2], [0.1, -0.55, 0.04]);
        let oracle = Arc::new(OneMiss {
            calls: AtomicUsize::new(0),
            pose,
        });
        let mut sampler = GraspSampler::new(oracle.clone(), 17);
        let grasp = sampler.select_grasp(&cloud(), 2);
        assert_eq!(grasp.cost, 0.3);
        assert_eq!(grasp.pose, pose);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_infeasible_returns_fallback() {
        let oracle = Arc::new(Counting(AtomicUsize::new(0)));
        let mut sampler = GraspSampler::new(oracle.clone(), 1);
        let grasp = sampler.select_grasp(&cloud(), 100);
        assert!(grasp.cost.is_infinite());
        assert_eq!(grasp.pose, fallback_pose());
        assert_eq!(oracle.0.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn empty_cloud_skips_trials() {
        let oracle = Arc::new(Counting(AtomicUsize::new(0)));
        let mut sampler = GraspSampler::new(oracle.clone(), 1);
        let grasp = sampler.select_grasp(&PointCloud::default(), 5);
        assert!(!grasp.is_feasible());
        assert_eq!(oracle.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fallback_pose_values() {
        let pose = fallback_pose();
        assert!((pose.translation.vector - nalgebra::Vector3::new(0.5, 0.0, 0.22)).norm() < 1e-12);
        let (roll, pitch, yaw) = pose.rotation.euler_angles();
        assert!((roll + FRAC_PI_2).abs() < 1e-9);
        assert!(pitch.abs() < 1e-9);
        assert!((yaw - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn sampler_params_defaults() {
        let p = SamplerParams::default();
        assert_eq!(p.trials, 100);
        assert!(p.seed.is_none());
    }
}
