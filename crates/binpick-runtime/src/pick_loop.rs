//! [`PickLoop`] – the driving loop.
//!
//! Advances a simulated clock in fixed steps. Each step:
//!
//! 1. **Measure** – read the arm's joints, gripper width and gripper pose.
//! 2. **Decide** – [`TaskPlanner::tick`] at the current simulated time.
//! 3. **Report** – mode changes go to [`Topic::PlannerStatus`], a terminal
//!    failure to [`Topic::SystemAlerts`]. Publishing is best-effort.
//! 4. **Act** – the differential-IK controller tracks the commanded pose,
//!    [`MotionModeSwitch`] picks that or the planner's joint command, and
//!    the result goes to the arm with the commanded gripper width.
//!
//! A step that takes longer in wall time than the tick period logs a
//! warning; grasp sampling and motion optimization run inside the tick.
//!
//! The loop ends on a terminal task failure, a hardware fault, the
//! simulated time limit, or the shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use binpick_hal::Arm;
use binpick_middleware::{EventBus, Topic};
use binpick_planner::{GraspSource, MotionModeSwitch, TaskPlanner, TickReport};
use binpick_types::{Event, EventPayload, PickError, PlannerMode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, trace, warn};

use crate::control::DifferentialIk;

const SOURCE: &str = "binpick-runtime::pick_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Simulated seconds per tick.
    pub tick_period: f64,
    /// Simulated seconds after which the run stops.
    pub max_duration: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_period: 0.1,
            max_duration: 160.0,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The planner gave up.
    TaskFailed(PickError),
    /// A command could not be routed or applied, or the planner stopped on
    /// a hardware, sensor or configuration fault.
    Fault(PickError),
    TimeLimit,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub ticks: u64,
    /// Simulated seconds elapsed.
    pub sim_time: f64,
    pub final_mode: PlannerMode,
    /// Successful plans.
    pub plans: u32,
    /// Ticks that overran the tick period in wall time.
    pub overruns: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// PickLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct PickLoop {
    config: LoopConfig,
    planner: TaskPlanner,
    grasps: Box<dyn GraspSource + Send>,
    diff_ik: Box<dyn DifferentialIk>,
    switch: MotionModeSwitch,
    arm: Box<dyn Arm>,
    bus: EventBus,
    ticks: u64,
    plans: u32,
    last_plan: Option<f64>,
    overruns: u64,
}

impl PickLoop {
    pub fn new(
        config: LoopConfig,
        planner: TaskPlanner,
        grasps: Box<dyn GraspSource + Send>,
        diff_ik: Box<dyn DifferentialIk>,
        arm: Box<dyn Arm>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            planner,
            grasps,
            diff_ik,
            switch: MotionModeSwitch::new(),
            arm,
            bus,
            ticks: 0,
            plans: 0,
            last_plan: None,
            overruns: 0,
        }
    }

    /// Simulated time of the next tick.
    pub fn time(&self) -> f64 {
        self.ticks as f64 * self.config.tick_period
    }

    pub fn planner(&self) -> &TaskPlanner {
        &self.planner
    }

    pub fn arm(&self) -> &dyn Arm {
        self.arm.as_ref()
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// [`PickError::MissingCommand`] if the selected joint command is
    /// absent, or whatever the arm returns for a rejected command.
    pub fn step(&mut self) -> Result<TickReport, PickError> {
        let started = Instant::now();
        let now = self.time();

        // ── 1. Measure ────────────────────────────────────────────────────────
        let measured = self.arm.state();

        // ── 2. Decide ─────────────────────────────────────────────────────────
        let report = self.planner.tick(now, &measured, self.grasps.as_mut());

        // ── 3. Report ─────────────────────────────────────────────────────────
        let planned_at = self.planner.state().timeline.map(|tl| tl.initial);
        if planned_at.is_some() && planned_at != self.last_plan {
            self.plans += 1;
        }
        self.last_plan = planned_at;
        if report.mode != report.previous_mode {
            self.publish(
                Topic::PlannerStatus,
                EventPayload::ModeChanged {
                    from: report.previous_mode,
                    to: report.mode,
                    at: now,
                },
            );
        }
        if let Some(err) = &report.terminal {
            self.publish(Topic::SystemAlerts, EventPayload::TaskFailed(err.clone()));
        }

        // ── 4. Act ────────────────────────────────────────────────────────────
        let commands = &report.commands;
        let ik = self.diff_ik.solve(
            &commands.gripper_pose,
            &measured,
            commands.reset_diff_ik,
            self.config.tick_period,
        );
        let joints = self
            .switch
            .forward(commands.control, Some(&ik), Some(&commands.joint_position))?;
        self.arm.command(joints, commands.gripper_width)?;

        self.ticks += 1;
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs_f64(self.config.tick_period) {
            self.overruns += 1;
            warn!(
                t = now,
                elapsed_ms = elapsed.as_millis() as u64,
                "tick overran its period"
            );
        }
        Ok(report)
    }

    /// Step until the task fails, a fault occurs, the time limit passes, or
    /// `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> RunSummary {
        info!(
            tick_period = self.config.tick_period,
            max_duration = self.config.max_duration,
            "pick loop started"
        );
        let outcome = loop {
            if shutdown.load(Ordering::Acquire) {
                info!(t = self.time(), "shutdown requested");
                break RunOutcome::Interrupted;
            }
            if self.time() > self.config.max_duration {
                info!(t = self.time(), "time limit reached");
                break RunOutcome::TimeLimit;
            }
            match self.step() {
                Ok(report) => {
                    match report.terminal {
                        Some(err) if err.is_fault() => {
                            error!(error = %err, t = self.time(), "planner fault");
                            break RunOutcome::Fault(err);
                        }
                        Some(err) => break RunOutcome::TaskFailed(err),
                        None => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, t = self.time(), "command fault");
                    break RunOutcome::Fault(e);
                }
            }
        };

        RunSummary {
            outcome,
            ticks: self.ticks,
            sim_time: self.time(),
            final_mode: self.planner.mode(),
            plans: self.plans,
            overruns: self.overruns,
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            trace!(error = %e, "event dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grasp_source::{PerceptionGraspSource, PerceptionParams};
    use crate::sim::{ColorSegmenter, GantryDiffIk, GantryOptimizer};
    use binpick_grasp::{AntipodalOracle, GraspSampler, SamplerParams};
    use binpick_hal::sim::{FINGERTIP_OFFSET, SharedScene, SimRigBuilder};
    use binpick_hal::{Camera, RgbdFrame};
    use std::sync::Arc;
    use binpick_planner::PlannerConfig;
    use binpick_types::{GraspCandidate, Pose, pose_from_rpy};
    use std::f64::consts::FRAC_PI_2;

    fn sim_loop(config: LoopConfig, grasps: Box<dyn GraspSource + Send>, bus: EventBus) -> (PickLoop, SharedScene) {
        let rig = SimRigBuilder::new().build();
        let planner = TaskPlanner::new(
            PlannerConfig {
                seed: Some(5),
                ..PlannerConfig::default()
            },
            Box::new(GantryOptimizer::default()),
        );
        let scene = rig.scene.clone();
        let pick_loop = PickLoop::new(
            config,
            planner,
            grasps,
            Box::new(GantryDiffIk::default()),
            Box::new(rig.arm),
            bus,
        );
        (pick_loop, scene)
    }

    fn never() -> Box<dyn GraspSource + Send> {
        Box::new(|| GraspCandidate::infeasible(Pose::identity()))
    }

    struct DeadCamera;

    impl Camera for DeadCamera {
        fn id(&self) -> &str {
            "camera0"
        }

        fn capture(&mut self) -> Result<RgbdFrame, PickError> {
            Err(PickError::HardwareFault {
                component: "camera0".to_string(),
                details: "no frame".to_string(),
            })
        }
    }

    #[test]
    fn exhausted_grasp_search_ends_the_run() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let (mut pick_loop, _) = sim_loop(LoopConfig::default(), never(), bus);

        let summary = pick_loop.run(&AtomicBool::new(false));
        assert_eq!(
            summary.outcome,
            RunOutcome::TaskFailed(PickError::GraspExhausted { attempts: 5 })
        );
        // Settling ends at the first tick strictly after 1.0 s.
        assert_eq!(summary.ticks, 12);
        assert_eq!(summary.plans, 0);
        assert_eq!(summary.final_mode, PlannerMode::WaitForSettle);

        let event = alerts.try_recv().unwrap();
        assert!(matches!(event.payload, EventPayload::TaskFailed(PickError::GraspExhausted { .. })));
    }

    #[test]
    fn dead_camera_is_a_fault_not_an_exhausted_search() {
        let sampler = GraspSampler::from_params(Arc::new(AntipodalOracle::default()), &SamplerParams::default());
        let grasps = PerceptionGraspSource::new(
            vec![Box::new(DeadCamera)],
            Box::new(ColorSegmenter::default()),
            sampler,
            PerceptionParams::default(),
        );
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let (mut pick_loop, _) = sim_loop(LoopConfig::default(), Box::new(grasps), bus);

        let summary = pick_loop.run(&AtomicBool::new(false));
        assert!(
            matches!(&summary.outcome, RunOutcome::Fault(PickError::HardwareFault { component, .. }) if component == "camera0"),
            "{:?}",
            summary.outcome
        );
        assert_eq!(summary.ticks, 12);
        assert_eq!(summary.plans, 0);

        let event = alerts.try_recv().unwrap();
        assert!(matches!(event.payload, EventPayload::TaskFailed(PickError::HardwareFault { .. })));
    }

    #[test]
    fn time_limit_stops_the_run() {
        let config = LoopConfig {
            max_duration: 0.5,
            ..LoopConfig::default()
        };
        let (mut pick_loop, _) = sim_loop(config, never(), EventBus::default());
        let summary = pick_loop.run(&AtomicBool::new(false));
        assert_eq!(summary.outcome, RunOutcome::TimeLimit);
        assert_eq!(summary.ticks, 6);
    }

    #[test]
    fn shutdown_flag_stops_before_the_first_tick() {
        let (mut pick_loop, _) = sim_loop(LoopConfig::default(), never(), EventBus::default());
        let summary = pick_loop.run(&AtomicBool::new(true));
        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert_eq!(summary.ticks, 0);
    }

    #[test]
    fn moves_the_box_into_the_place_region() {
        // Fingertips on the box centre, approaching from above.
        let grasp = pose_from_rpy([-FRAC_PI_2, 0.0, FRAC_PI_2], [0.0, -0.6, 0.03 + FINGERTIP_OFFSET]);
        let mut offered = false;
        let once = move || {
            if offered {
                GraspCandidate::infeasible(Pose::identity())
            } else {
                offered = true;
                GraspCandidate::new(-1.0, grasp)
            }
        };

        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::PlannerStatus);
        let (mut pick_loop, scene) = sim_loop(LoopConfig::default(), Box::new(once), bus);
        let summary = pick_loop.run(&AtomicBool::new(false));

        assert_eq!(
            summary.outcome,
            RunOutcome::TaskFailed(PickError::GraspExhausted { attempts: 5 })
        );
        assert_eq!(summary.plans, 1);

        let scene = scene.lock().unwrap();
        assert!(!scene.held);
        assert!(!scene.in_source_bin());
        let c = scene.object.center;
        assert!((0.35..=0.65).contains(&c.x), "x = {}", c.x);
        assert!((0.0..=0.35).contains(&c.y), "y = {}", c.y);

        let mut modes = Vec::new();
        while let Ok(event) = status.try_recv() {
            if let EventPayload::ModeChanged { to, .. } = event.payload {
                modes.push(to);
            }
        }
        assert_eq!(
            modes,
            vec![
                PlannerMode::PickTrajopt,
                PlannerMode::PickDiffIk,
                PlannerMode::PickTrajopt,
                PlannerMode::PickDiffIk,
            ]
        );
    }
}
