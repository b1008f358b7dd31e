//! Task-planner parameters.

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

/// Tunables for [`TaskPlanner`](crate::TaskPlanner). Every field has a
/// serde default, so a partial TOML table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Seconds to idle in `WAIT_FOR_SETTLE` before planning.
    pub settle_time: f64,
    /// Grasp selections tried per plan before giving up.
    pub grasp_attempts: u32,
    /// Failed picks tolerated before the task fails.
    pub max_attempts: u32,
    /// Measured finger gap (m) below which the gripper holds nothing.
    pub closed_threshold: f64,
    /// Commanded-vs-measured gripper distance (m) that triggers `GO_HOME`.
    pub divergence_threshold: f64,
    /// Seconds allotted to the return-home motion.
    pub go_home_duration: f64,
    /// Standoff (m) before the pick and place poses.
    pub prepick_distance: f64,
    pub place_x: [f64; 2],
    pub place_y: [f64; 2],
    pub place_z: f64,
    /// Place orientation as roll/pitch/yaw.
    pub place_rpy: [f64; 3],
    pub gripper_open: f64,
    pub gripper_closed: f64,
    /// Home joint configuration. Captured from the first measurement when
    /// unset.
    pub home: Option<Vec<f64>>,
    /// Seed for the place-pose sampler.
    pub seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            settle_time: 1.0,
            grasp_attempts: 5,
            max_attempts: 5,
            closed_threshold: 0.01,
            divergence_threshold: 0.2,
            go_home_duration: 5.0,
            prepick_distance: 0.12,
            place_x: [0.35, 0.65],
            place_y: [0.0, 0.35],
            place_z: 0.0,
            place_rpy: [-FRAC_PI_2, 0.0, FRAC_PI_2],
            gripper_open: 0.107,
            gripper_closed: 0.0,
            home: None,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_fills_defaults() {
        let cfg: PlannerConfig = toml::from_str("settle_time = 2.5\nseed = 7\n").unwrap();
        assert!((cfg.settle_time - 2.5).abs() < 1e-12);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.place_x, [0.35, 0.65]);
        assert!(cfg.home.is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = PlannerConfig {
            home: Some(vec![0.0; 7]),
            ..PlannerConfig::default()
        };
        let text = toml::to_string(&cfg).unwrap();
        let back: PlannerConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
