//! [`TaskPlanner`] – the pick-and-place state machine.
//!
//! # Tick phases
//!
//! Every call to [`TaskPlanner::tick`] reads the previous [`PlannerState`],
//! computes one [`Transition`] for the current mode, applies it to a copy,
//! and commits the copy at the end of the tick. Nothing outside the planner
//! can observe a half-updated state.
//!
//! 1. **Home capture** – the first tick stores the measured joints as home
//!    unless [`PlannerConfig::home`] is set.
//! 2. **Transition** – one function per mode decides whether to stay,
//!    switch modes, replan, or give up.
//! 3. **Commands** – the commanded gripper pose, gripper width, control
//!    source, diff-IK reset flag, and joint position are evaluated from the
//!    committed state.
//!
//! A terminal failure (no grasp found, the object lost too often, or a
//! fault raised by the grasp source or the configuration) is reported once
//! in [`TickReport::terminal`]; afterwards the planner holds its outputs and
//! ignores further ticks.

use std::sync::Arc;

use binpick_hal::ArmState;
use binpick_middleware::{NullVisualizer, Visualizer};
use binpick_types::{ControlSource, GraspCandidate, Marker, PickError, PlannerMode, Pose, pose_from_rpy};
use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::attempts::{AttemptCounter, AttemptOutcome};
use crate::config::PlannerConfig;
use crate::keyframes::{Keyframes, Timeline, gripper_command_trajectory, make_gripper_frames};
use crate::motion::{MotionOptimizer, plan_motion};
use crate::trajectory::{JointTrajectory, PoseTrajectory, WidthTrajectory};

/// Supplies a freshly selected grasp each time the planner asks.
pub trait GraspSource {
    /// An infinite cost means no feasible grasp was found this time.
    ///
    /// # Errors
    ///
    /// Retryable errors (see [`PickError::is_retryable`]) count as one failed
    /// try. Any other error ends the task.
    fn select_grasp(&mut self) -> Result<GraspCandidate, PickError>;
}

impl<F: FnMut() -> GraspCandidate> GraspSource for F {
    fn select_grasp(&mut self) -> Result<GraspCandidate, PickError> {
        Ok(self())
    }
}

/// Whether the task is still running.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Active,
    Failed(PickError),
}

/// Everything the planner remembers between ticks.
#[derive(Debug, Clone)]
pub struct PlannerState {
    pub mode: PlannerMode,
    /// When the current settle phase began.
    pub settle_start: f64,
    pub keyframes: Option<Keyframes>,
    pub timeline: Option<Timeline>,
    pub pose_trajectory: Option<PoseTrajectory>,
    pub gripper_trajectory: Option<WidthTrajectory>,
    /// The joint trajectory followed in position control.
    pub joint_trajectory: Option<JointTrajectory>,
    /// Carry trajectory, installed when the carry window opens.
    pub place_trajectory: Option<JointTrajectory>,
    pub attempts: AttemptCounter,
    pub home: Option<DVector<f64>>,
    pub status: TaskStatus,
}

impl PlannerState {
    fn new(max_attempts: u32) -> Self {
        Self {
            mode: PlannerMode::WaitForSettle,
            settle_start: 0.0,
            keyframes: None,
            timeline: None,
            pose_trajectory: None,
            gripper_trajectory: None,
            joint_trajectory: None,
            place_trajectory: None,
            attempts: AttemptCounter::new(max_attempts),
            home: None,
            status: TaskStatus::Active,
        }
    }

    /// Re-enter `WAIT_FOR_SETTLE`, holding the gripper where it is.
    fn resettle(&mut self, now: f64, hold: Pose) {
        self.mode = PlannerMode::WaitForSettle;
        self.settle_start = now;
        self.keyframes = None;
        self.timeline = None;
        self.pose_trajectory = Some(PoseTrajectory::hold(hold, now));
        self.gripper_trajectory = None;
        self.joint_trajectory = None;
        self.place_trajectory = None;
    }

    fn fail(&mut self, err: PickError) -> Option<PickError> {
        self.status = TaskStatus::Failed(err.clone());
        Some(err)
    }
}

/// The decision computed for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stay,
    Replan,
    Enter {
        mode: PlannerMode,
        joints: Option<JointTrajectory>,
    },
    /// The gripper closed on nothing during the carry.
    LostObject,
    /// The pose trajectory ran past postplace: start the next cycle.
    Completed,
    Fail(PickError),
}

/// Per-tick outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerCommands {
    pub gripper_pose: Pose,
    pub gripper_width: f64,
    pub control: ControlSource,
    /// `true` while the diff-IK integrator should track the measured state.
    pub reset_diff_ik: bool,
    pub joint_position: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub previous_mode: PlannerMode,
    pub mode: PlannerMode,
    pub commands: PlannerCommands,
    /// Set only on the tick where the task fails.
    pub terminal: Option<PickError>,
}

struct PlannedMotion {
    pick: JointTrajectory,
    place: JointTrajectory,
    pose: PoseTrajectory,
    width: WidthTrajectory,
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskPlanner
// ─────────────────────────────────────────────────────────────────────────────

pub struct TaskPlanner {
    config: PlannerConfig,
    state: PlannerState,
    optimizer: Box<dyn MotionOptimizer>,
    visualizer: Arc<dyn Visualizer>,
    rng: ChaCha8Rng,
}

impl TaskPlanner {
    pub fn new(config: PlannerConfig, optimizer: Box<dyn MotionOptimizer>) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            state: PlannerState::new(config.max_attempts),
            config,
            optimizer,
            visualizer: Arc::new(NullVisualizer),
            rng,
        }
    }

    pub fn with_visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> &PlannerState {
        &self.state
    }

    pub fn mode(&self) -> PlannerMode {
        self.state.mode
    }

    pub fn status(&self) -> &TaskStatus {
        &self.state.status
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state.status, TaskStatus::Failed(_))
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Advance the state machine to simulation time `now`.
    pub fn tick(&mut self, now: f64, measured: &ArmState, grasps: &mut dyn GraspSource) -> TickReport {
        let previous_mode = self.state.mode;
        let mut next = self.state.clone();

        let mut terminal = None;
        if next.home.is_none() {
            let home = match &self.config.home {
                Some(q) => DVector::from_column_slice(q),
                None => measured.joints.clone(),
            };
            debug!(home = ?home.as_slice(), "home configuration captured");
            if home.len() != measured.joints.len() {
                let err = PickError::InvalidConfiguration(format!(
                    "home has {} joints but the arm reports {}",
                    home.len(),
                    measured.joints.len()
                ));
                error!(error = %err, "task failed");
                terminal = next.fail(err);
            }
            next.home = Some(home);
        }

        if next.status == TaskStatus::Active {
            let transition = match next.mode {
                PlannerMode::WaitForSettle => self.settle_transition(&next, now),
                PlannerMode::GoHome => self.go_home_transition(&next, now),
                PlannerMode::PickTrajopt | PlannerMode::PickDiffIk => {
                    self.pick_transition(&next, now, measured)
                }
            };
            terminal = self.apply(&mut next, transition, now, measured, grasps);
        }

        self.state = next;
        if self.state.mode != previous_mode {
            info!(from = %previous_mode, to = %self.state.mode, t = now, "mode transition");
        }

        TickReport {
            previous_mode,
            mode: self.state.mode,
            commands: self.commands(now, measured),
            terminal,
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    fn settle_transition(&self, state: &PlannerState, now: f64) -> Transition {
        if now - state.settle_start > self.config.settle_time {
            Transition::Replan
        } else {
            Transition::Stay
        }
    }

    fn go_home_transition(&self, state: &PlannerState, now: f64) -> Transition {
        match &state.joint_trajectory {
            Some(traj) if traj.is_time_in_range(now) => Transition::Stay,
            _ => Transition::Replan,
        }
    }

    fn pick_transition(&self, state: &PlannerState, now: f64, measured: &ArmState) -> Transition {
        if state.mode == PlannerMode::PickTrajopt
            && !state
                .joint_trajectory
                .as_ref()
                .is_some_and(|traj| traj.is_time_in_range(now))
        {
            return Transition::Enter {
                mode: PlannerMode::PickDiffIk,
                joints: None,
            };
        }

        if state.timeline.is_some_and(|tl| tl.in_carry_window(now)) {
            if state.mode == PlannerMode::PickDiffIk {
                return match &state.place_trajectory {
                    Some(place) => Transition::Enter {
                        mode: PlannerMode::PickTrajopt,
                        joints: Some(place.clone()),
                    },
                    None => Transition::Replan,
                };
            }
            if measured.gripper_width < self.config.closed_threshold {
                return Transition::LostObject;
            }
            return Transition::Stay;
        }

        let Some(pose_traj) = state.pose_trajectory.as_ref().filter(|t| t.is_time_in_range(now)) else {
            if state.timeline.is_some_and(|tl| now >= tl.postplace) {
                return Transition::Completed;
            }
            return Transition::Replan;
        };

        if state.mode == PlannerMode::PickDiffIk {
            let commanded = pose_traj.value(now).translation.vector;
            let error_m = (commanded - measured.gripper_pose.translation.vector).norm();
            if error_m > self.config.divergence_threshold {
                warn!(error = %PickError::TrackingDivergence { error_m }, "returning home");
                return match self.home_trajectory(state, now, measured) {
                    Ok(traj) => Transition::Enter {
                        mode: PlannerMode::GoHome,
                        joints: Some(traj),
                    },
                    Err(e) => Transition::Fail(e),
                };
            }
        }
        Transition::Stay
    }

    /// Straight joint-space motion to home, leaving joint 0 where it is.
    fn home_trajectory(
        &self,
        state: &PlannerState,
        now: f64,
        measured: &ArmState,
    ) -> Result<JointTrajectory, PickError> {
        let q = measured.joints.clone();
        let mut target = state.home.clone().unwrap_or_else(|| q.clone());
        if target.len() == q.len() && !q.is_empty() {
            target[0] = q[0];
        }
        JointTrajectory::first_order_hold(vec![now, now + self.config.go_home_duration], vec![q, target])
    }

    fn apply(
        &mut self,
        next: &mut PlannerState,
        transition: Transition,
        now: f64,
        measured: &ArmState,
        grasps: &mut dyn GraspSource,
    ) -> Option<PickError> {
        match transition {
            Transition::Stay => None,
            Transition::Replan => self.plan(next, now, measured, grasps),
            Transition::Enter { mode, joints } => {
                next.mode = mode;
                if let Some(traj) = joints {
                    next.joint_trajectory = Some(traj);
                }
                None
            }
            Transition::LostObject => match next.attempts.record_failure() {
                AttemptOutcome::Retry { attempt } => {
                    warn!(attempt, max = next.attempts.max(), "gripper lost the object; re-settling");
                    next.resettle(now, measured.gripper_pose);
                    None
                }
                AttemptOutcome::Exhausted { attempts } => {
                    let err = PickError::GripperLostObject { attempts };
                    error!(error = %err, "task failed");
                    next.fail(err)
                }
            },
            Transition::Completed => {
                info!(attempts = next.attempts.count(), "pick-and-place cycle completed");
                next.attempts.reset();
                self.plan(next, now, measured, grasps)
            }
            Transition::Fail(err) => {
                error!(error = %err, "task failed");
                next.fail(err)
            }
        }
    }

    // ── Planning ────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(t = now))]
    fn plan(
        &mut self,
        next: &mut PlannerState,
        now: f64,
        measured: &ArmState,
        grasps: &mut dyn GraspSource,
    ) -> Option<PickError> {
        let grasp = match self.find_grasp(grasps) {
            Ok(Some(grasp)) => grasp,
            Ok(None) => {
                let err = PickError::GraspExhausted {
                    attempts: self.config.grasp_attempts,
                };
                error!(error = %err, "task failed");
                return next.fail(err);
            }
            Err(err) => {
                error!(error = %err, "grasp source fault; task failed");
                return next.fail(err);
            }
        };

        let initial = measured.gripper_pose;
        let place = self.sample_place_pose();
        let (keyframes, mut timeline) =
            make_gripper_frames(&initial, &grasp.pose, &place, now, self.config.prepick_distance);

        let planned = match self.plan_motions(&keyframes, &mut timeline) {
            Ok(planned) => planned,
            Err(e) => {
                return match next.attempts.record_failure() {
                    AttemptOutcome::Retry { attempt } => {
                        warn!(error = %e, attempt, "motion planning failed; re-settling");
                        next.resettle(now, initial);
                        None
                    }
                    AttemptOutcome::Exhausted { attempts } => {
                        error!(error = %e, attempts, "motion planning keeps failing; task failed");
                        next.fail(e)
                    }
                };
            }
        };

        self.publish_plan_markers(&keyframes);
        info!(
            cost = grasp.cost,
            prepick = timeline.prepick,
            postplace = timeline.postplace,
            "planned {:.0} s pick-and-place",
            timeline.postplace - timeline.initial
        );

        next.mode = PlannerMode::PickTrajopt;
        next.keyframes = Some(keyframes);
        next.timeline = Some(timeline);
        next.pose_trajectory = Some(planned.pose);
        next.gripper_trajectory = Some(planned.width);
        next.joint_trajectory = Some(planned.pick);
        next.place_trajectory = Some(planned.place);
        None
    }

    /// Up to `grasp_attempts` selections. `Ok(None)` when none was feasible.
    fn find_grasp(&mut self, grasps: &mut dyn GraspSource) -> Result<Option<GraspCandidate>, PickError> {
        for attempt in 1..=self.config.grasp_attempts {
            match grasps.select_grasp() {
                Ok(candidate) if candidate.is_feasible() => return Ok(Some(candidate)),
                Ok(_) => {
                    debug!(error = %PickError::GraspNotFound { attempts: attempt }, "retrying grasp selection");
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, attempt, "grasp selection failed; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn sample_place_pose(&mut self) -> Pose {
        let [x0, x1] = self.config.place_x;
        let [y0, y1] = self.config.place_y;
        let x = self.rng.gen_range(x0.min(x1)..=x0.max(x1));
        let y = self.rng.gen_range(y0.min(y1)..=y0.max(y1));
        pose_from_rpy(self.config.place_rpy, [x, y, self.config.place_z])
    }

    /// Solve both transit legs and retime the sketch to their real durations.
    fn plan_motions(&self, keyframes: &Keyframes, timeline: &mut Timeline) -> Result<PlannedMotion, PickError> {
        let optimizer = self.optimizer.as_ref();
        let pick = plan_motion(optimizer, &keyframes.initial, &keyframes.prepick, timeline.initial)?;
        timeline.retime_pick(pick.duration());
        let place = plan_motion(optimizer, &keyframes.postpick, &keyframes.preplace, timeline.postpick)?;
        timeline.retime_place(place.duration());

        Ok(PlannedMotion {
            pose: keyframes.pose_trajectory(timeline)?,
            width: gripper_command_trajectory(timeline, self.config.gripper_open, self.config.gripper_closed)?,
            pick,
            place,
        })
    }

    fn publish_plan_markers(&self, keyframes: &Keyframes) {
        let [x0, x1] = self.config.place_x;
        let [y0, y1] = self.config.place_y;
        let z = self.config.place_z;
        let markers = vec![
            Marker::sphere("planner/place_region/lower", [x0, y0, z], 0.02, [0.9, 0.1, 0.1, 1.0]),
            Marker::sphere("planner/place_region/upper", [x1, y1, z], 0.02, [0.1, 0.9, 0.1, 1.0]),
            Marker::triad("planner/initial", keyframes.initial),
            Marker::triad("planner/prepick", keyframes.prepick),
            Marker::triad("planner/pick", keyframes.pick_start),
            Marker::triad("planner/place", keyframes.place_start),
        ];
        if let Err(e) = self.visualizer.publish(markers) {
            warn!(error = %e, "failed to publish plan markers");
        }
    }

    // ── Outputs ─────────────────────────────────────────────────────────────

    /// Evaluate every output for time `now` from the committed state.
    pub fn commands(&self, now: f64, measured: &ArmState) -> PlannerCommands {
        let state = &self.state;
        let control = match state.mode {
            PlannerMode::GoHome | PlannerMode::PickTrajopt => ControlSource::Position,
            PlannerMode::WaitForSettle | PlannerMode::PickDiffIk => ControlSource::DiffIk,
        };

        let gripper_pose = state
            .pose_trajectory
            .as_ref()
            .filter(|t| t.is_time_in_range(now))
            .map_or(measured.gripper_pose, |t| t.value(now));

        let gripper_width = if state.mode == PlannerMode::GoHome {
            self.config.gripper_open
        } else {
            state
                .gripper_trajectory
                .as_ref()
                .filter(|t| t.is_time_in_range(now))
                .map_or(self.config.gripper_open, |t| t.value(now))
        };

        let joint_position = state
            .joint_trajectory
            .as_ref()
            .map_or_else(|| measured.joints.clone(), |t| t.value(now));

        PlannerCommands {
            gripper_pose,
            gripper_width,
            control,
            reset_diff_ik: control == ControlSource::Position,
            joint_position,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
