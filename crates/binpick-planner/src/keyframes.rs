//! Gripper keyframes and the task timeline.
//!
//! [`make_gripper_frames`] expands the three poses a plan starts from
//! (`initial`, `pick`, `place`) into ten named keyframes with a sketch
//! [`Timeline`]. The sketch times are replaced by the motion optimizer's
//! real durations through [`Timeline::retime_pick`] and
//! [`Timeline::retime_place`] before anything is installed.
//!
//! Gripper frame convention: +x is the closing axis, +y the approach axis.

use binpick_types::{PickError, Pose};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::trajectory::{PoseTrajectory, WidthTrajectory};

/// Seconds of sketch travel time per metre of gripper motion.
pub const SECONDS_PER_METRE: f64 = 10.0;
/// Dwell between the grasp and release keyframes.
pub const GRIPPER_DWELL: f64 = 2.0;
/// Lift of the clearance keyframe along the gripper's −y axis.
pub const CLEARANCE_LIFT: f64 = 0.3;
/// Shortest segment the timeline will schedule.
pub const MIN_SEGMENT: f64 = 0.1;

/// The ten gripper poses of one pick-and-place cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframes {
    pub initial: Pose,
    pub prepick: Pose,
    pub pick_start: Pose,
    pub pick_end: Pose,
    pub postpick: Pose,
    pub clearance: Pose,
    pub preplace: Pose,
    pub place_start: Pose,
    pub place_end: Pose,
    pub postplace: Pose,
}

/// Timestamps (seconds) of each keyframe, strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub initial: f64,
    pub prepick: f64,
    pub pick_start: f64,
    pub pick_end: f64,
    pub postpick: f64,
    pub clearance: f64,
    pub preplace: f64,
    pub place_start: f64,
    pub place_end: f64,
    pub postplace: f64,
}

impl Timeline {
    pub fn as_array(&self) -> [f64; 10] {
        [
            self.initial,
            self.prepick,
            self.pick_start,
            self.pick_end,
            self.postpick,
            self.clearance,
            self.preplace,
            self.place_start,
            self.place_end,
            self.postplace,
        ]
    }

    /// `true` while the object should be in the closed gripper and moving
    /// between bins: `postpick ≤ t < preplace`.
    pub fn in_carry_window(&self, t: f64) -> bool {
        t >= self.postpick && t < self.preplace
    }

    /// Reschedule so that `prepick = initial + duration`, shifting every
    /// later keyframe by the same amount.
    pub fn retime_pick(&mut self, duration: f64) {
        let delta = self.initial + duration.max(MIN_SEGMENT) - self.prepick;
        for t in [
            &mut self.prepick,
            &mut self.pick_start,
            &mut self.pick_end,
            &mut self.postpick,
            &mut self.clearance,
            &mut self.preplace,
            &mut self.place_start,
            &mut self.place_end,
            &mut self.postplace,
        ] {
            *t += delta;
        }
    }

    /// Reschedule so that `preplace = postpick + duration`, with the
    /// clearance keyframe halfway between.
    pub fn retime_place(&mut self, duration: f64) {
        let duration = duration.max(MIN_SEGMENT);
        let delta = self.postpick + duration - self.preplace;
        self.clearance = self.postpick + duration / 2.0;
        for t in [
            &mut self.preplace,
            &mut self.place_start,
            &mut self.place_end,
            &mut self.postplace,
        ] {
            *t += delta;
        }
    }
}

/// Offset `pose` back along its approach axis by `distance`.
fn standoff(pose: &Pose, distance: f64) -> Pose {
    pose * Isometry3::from_parts(Translation3::new(0.0, -distance, 0.0), UnitQuaternion::identity())
}

fn travel_time(from: &Pose, to: &Pose) -> f64 {
    (SECONDS_PER_METRE * (to.translation.vector - from.translation.vector).norm()).max(MIN_SEGMENT)
}

/// Expand `initial`, `pick` and `place` into the full keyframe set and a
/// sketch timeline starting at `t0`.
pub fn make_gripper_frames(
    initial: &Pose,
    pick: &Pose,
    place: &Pose,
    t0: f64,
    prepick_distance: f64,
) -> (Keyframes, Timeline) {
    let prepick = standoff(pick, prepick_distance);
    let preplace = standoff(place, prepick_distance);

    // Halfway between the standoffs, lifted clear of both bins.
    let relative = prepick.inverse() * preplace;
    let half_rotation = relative
        .rotation
        .axis_angle()
        .map(|(axis, angle)| UnitQuaternion::from_axis_angle(&axis, angle / 2.0))
        .unwrap_or_else(UnitQuaternion::identity);
    let half_translation = relative.translation.vector / 2.0 + Vector3::new(0.0, -CLEARANCE_LIFT, 0.0);
    let clearance = prepick * Isometry3::from_parts(Translation3::from(half_translation), half_rotation);

    let frames = Keyframes {
        initial: *initial,
        prepick,
        pick_start: *pick,
        pick_end: *pick,
        postpick: prepick,
        clearance,
        preplace,
        place_start: *place,
        place_end: *place,
        postplace: preplace,
    };

    let t_prepick = t0 + travel_time(initial, &prepick);
    let t_pick_start = t_prepick + GRIPPER_DWELL;
    let t_pick_end = t_pick_start + GRIPPER_DWELL;
    let t_postpick = t_pick_end + GRIPPER_DWELL;
    let leg = (SECONDS_PER_METRE * half_translation.norm()).max(MIN_SEGMENT);
    let t_clearance = t_postpick + leg;
    let t_preplace = t_clearance + leg;
    let t_place_start = t_preplace + GRIPPER_DWELL;
    let t_place_end = t_place_start + GRIPPER_DWELL;
    let t_postplace = t_place_end + GRIPPER_DWELL;

    let timeline = Timeline {
        initial: t0,
        prepick: t_prepick,
        pick_start: t_pick_start,
        pick_end: t_pick_end,
        postpick: t_postpick,
        clearance: t_clearance,
        preplace: t_preplace,
        place_start: t_place_start,
        place_end: t_place_end,
        postplace: t_postplace,
    };
    (frames, timeline)
}

impl Keyframes {
    pub fn as_array(&self) -> [Pose; 10] {
        [
            self.initial,
            self.prepick,
            self.pick_start,
            self.pick_end,
            self.postpick,
            self.clearance,
            self.preplace,
            self.place_start,
            self.place_end,
            self.postplace,
        ]
    }

    /// Gripper pose trajectory through all ten keyframes.
    pub fn pose_trajectory(&self, timeline: &Timeline) -> Result<PoseTrajectory, PickError> {
        PoseTrajectory::linear(timeline.as_array().to_vec(), self.as_array().to_vec())
    }
}

/// Finger command: open until `pick_start`, closed from `pick_end` to
/// `place_start`, open again from `place_end` to `postplace`.
pub fn gripper_command_trajectory(
    timeline: &Timeline,
    open: f64,
    closed: f64,
) -> Result<WidthTrajectory, PickError> {
    WidthTrajectory::first_order_hold(
        vec![
            timeline.initial,
            timeline.pick_start,
            timeline.pick_end,
            timeline.place_start,
            timeline.place_end,
            timeline.postplace,
        ],
        vec![open, open, closed, closed, open, open],
    )
}
