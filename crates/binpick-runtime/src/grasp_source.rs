//! [`PerceptionGraspSource`] – camera frames in, one grasp out.
//!
//! Each [`GraspSource::select_grasp`] call captures every camera, segments
//! the prompted target in the region-of-interest camera, turns its mask into
//! a padded crop box, fuses the cropped clouds, and runs the grasp sampler.
//! Nothing is cached between calls; the scene may have changed.
//!
//! Retryable failures (nothing segmented, too few points) go back to the
//! planner's bounded retry loop. Hardware, sensor and geometry faults are
//! returned as they are and end the task.

use std::sync::Arc;

use binpick_grasp::{GraspSampler, SamplerParams};
use binpick_hal::{Camera, RgbdFrame};
use binpick_middleware::{EventBus, NullVisualizer, Topic, Visualizer};
use binpick_perception::{
    FusionParams, PointCloud, RoiParams, Segmenter, acquire_target_mask, compute_region_of_interest, fuse_clouds,
};
use binpick_planner::GraspSource;
use binpick_types::{Event, EventPayload, GraspCandidate, Marker, PickError, Pose};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

const SOURCE: &str = "binpick-runtime::grasp_source";

/// Perception pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionParams {
    /// Text prompt handed to the segmenter.
    pub prompt: String,
    /// Index of the camera whose image is segmented.
    pub roi_camera: usize,
    pub roi: RoiParams,
    pub fusion: FusionParams,
    pub sampler: SamplerParams,
}

impl Default for PerceptionParams {
    fn default() -> Self {
        Self {
            prompt: "red box".to_string(),
            roi_camera: 0,
            roi: RoiParams::default(),
            fusion: FusionParams::default(),
            sampler: SamplerParams::default(),
        }
    }
}

pub struct PerceptionGraspSource {
    cameras: Vec<Box<dyn Camera>>,
    segmenter: Box<dyn Segmenter>,
    sampler: GraspSampler,
    params: PerceptionParams,
    visualizer: Arc<dyn Visualizer>,
    bus: Option<EventBus>,
}

impl PerceptionGraspSource {
    pub fn new(
        cameras: Vec<Box<dyn Camera>>,
        segmenter: Box<dyn Segmenter>,
        sampler: GraspSampler,
        params: PerceptionParams,
    ) -> Self {
        Self {
            cameras,
            segmenter,
            sampler,
            params,
            visualizer: Arc::new(NullVisualizer),
            bus: None,
        }
    }

    pub fn with_visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    /// Announce every feasible selection on [`Topic::PlannerStatus`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run the whole pipeline once.
    ///
    /// # Errors
    ///
    /// Propagates capture, segmentation, region-of-interest and fusion
    /// errors. An infeasible sampler result is not an error.
    #[instrument(skip_all, fields(prompt = %self.params.prompt))]
    pub fn try_select(&mut self) -> Result<GraspCandidate, PickError> {
        let frames = self
            .cameras
            .iter_mut()
            .map(|camera| camera.capture())
            .collect::<Result<Vec<RgbdFrame>, PickError>>()?;
        let roi_frame = frames.get(self.params.roi_camera).ok_or_else(|| {
            PickError::InvalidSensorData(format!(
                "region-of-interest camera {} missing ({} cameras)",
                self.params.roi_camera,
                frames.len()
            ))
        })?;

        let detection = acquire_target_mask(self.segmenter.as_ref(), &roi_frame.rgb, &self.params.prompt)?;
        debug!(phrase = %detection.phrase, score = detection.score, "target segmented");
        let bbox = compute_region_of_interest(
            &detection.mask,
            &roi_frame.depth,
            &roi_frame.intrinsics,
            &roi_frame.pose,
            &self.params.roi,
        )?;
        self.publish(vec![
            Marker::sphere("perception/crop/lower", bbox.min.coords.into(), 0.01, [1.0, 0.0, 1.0, 1.0]),
            Marker::sphere("perception/crop/upper", bbox.max.coords.into(), 0.01, [1.0, 0.0, 1.0, 1.0]),
        ]);

        let clouds: Vec<PointCloud> = frames
            .iter()
            .map(|f| PointCloud::from_positions(f.points.iter().copied()))
            .collect();
        let poses: Vec<Pose> = frames.iter().map(|f| f.pose).collect();
        let fused = fuse_clouds(&clouds, &bbox, &poses, &self.params.fusion)?;

        Ok(self.sampler.select_grasp(&fused, self.params.sampler.trials))
    }

    fn publish(&self, markers: Vec<Marker>) {
        if let Err(e) = self.visualizer.publish(markers) {
            warn!(error = %e, "failed to publish crop markers");
        }
    }

    fn announce(&self, candidate: &GraspCandidate) {
        let Some(bus) = &self.bus else {
            return;
        };
        let event = Event::new(
            SOURCE,
            EventPayload::GraspSelected {
                cost: candidate.cost,
                pose: candidate.pose,
            },
        );
        if let Err(e) = bus.publish_to(Topic::PlannerStatus, event) {
            trace!(error = %e, "grasp announcement dropped");
        }
    }
}

impl GraspSource for PerceptionGraspSource {
    fn select_grasp(&mut self) -> Result<GraspCandidate, PickError> {
        let candidate = self.try_select().inspect_err(|e| {
            if !e.is_retryable() {
                warn!(error = %e, "perception fault");
            }
        })?;
        if candidate.is_feasible() {
            self.announce(&candidate);
        }
        Ok(candidate)
    }
}
