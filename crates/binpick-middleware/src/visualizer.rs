//! Debug-marker sink.
//!
//! Perception and planning push [`Marker`]s (crop-box corners, keyframe
//! triads, place-region bounds) through a [`Visualizer`]. Delivery is
//! fire-and-forget: callers log a failed publish and carry on, so a missing
//! or slow viewer never affects task behavior.

use binpick_types::{Event, EventPayload, Marker, PickError};
use tracing::trace;

use crate::bus::{EventBus, Topic};

/// A sink for debug markers.
pub trait Visualizer: Send + Sync {
    /// Publish a batch of markers. Implementations must not block.
    fn publish(&self, markers: Vec<Marker>) -> Result<(), PickError>;
}

/// Discards every marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisualizer;

impl Visualizer for NullVisualizer {
    fn publish(&self, _markers: Vec<Marker>) -> Result<(), PickError> {
        Ok(())
    }
}

/// Forwards markers to [`Topic::Visualization`] on an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusVisualizer {
    bus: EventBus,
    source: String,
}

impl BusVisualizer {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

impl Visualizer for BusVisualizer {
    fn publish(&self, markers: Vec<Marker>) -> Result<(), PickError> {
        // No viewer attached is the common case.
        if self.bus.subscriber_count(Topic::Visualization) == 0 {
            trace!(count = markers.len(), "no viewer attached; markers dropped");
            return Ok(());
        }
        let event = Event::new(self.source.clone(), EventPayload::Markers(markers));
        self.bus.publish_to(Topic::Visualization, event).map(|_| ())
    }
}
