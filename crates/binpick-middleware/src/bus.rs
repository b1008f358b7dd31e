//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. Publishing never blocks the control tick.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Visualization`] | Crop-box corners, keyframe triads, place-region markers |
//! | [`Topic::PlannerStatus`] | Mode transitions and selected grasps |
//! | [`Topic::SystemAlerts`] | Terminal task failures and hardware faults |

use binpick_types::{Event, PickError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Debug geometry for an external 3-D viewer.
    Visualization,
    /// Planner mode changes and grasp selections.
    PlannerStatus,
    /// Terminal failures and faults.
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    visualization: broadcast::Sender<Event>,
    planner_status: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (visualization, _) = broadcast::channel(capacity);
        let (planner_status, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            visualization,
            planner_status,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`PickError::Channel`] when nobody is listening on the topic.
    /// Best-effort callers ignore that error.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, PickError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| PickError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Visualization => &self.visualization,
            Topic::PlannerStatus => &self.planner_status,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for synchronous consumers such as the driving
    /// loop and tests.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binpick_types::{EventPayload, PlannerMode};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::ModeChanged {
                from: PlannerMode::WaitForSettle,
                to: PlannerMode::PickTrajopt,
                at: 1.0,
            },
        )
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::PlannerStatus, make_event("test"));
        assert!(matches!(result, Err(PickError::Channel(_))));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::PlannerStatus);
        let mut subscriber2 = bus.subscribe_to(Topic::PlannerStatus);

        let event = make_event("binpick-planner::task");
        let delivered = bus.publish_to(Topic::PlannerStatus, event.clone())?;
        assert_eq!(delivered, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts_sub = bus.subscribe_to(Topic::SystemAlerts);
        let _status_sub = bus.subscribe_to(Topic::PlannerStatus);

        bus.publish_to(Topic::PlannerStatus, make_event("binpick-planner::task"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts_sub.recv()).await;
        assert!(result.is_err(), "SystemAlerts subscriber must not receive a status event");
        Ok(())
    }

    #[test]
    fn try_recv_drains_synchronously() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Visualization);
        assert_eq!(bus.subscriber_count(Topic::Visualization), 1);

        let _ = bus.publish_to(Topic::Visualization, make_event("a"));
        let _ = bus.publish_to(Topic::Visualization, make_event("b"));

        assert_eq!(rx.try_recv().map(|e| e.source).ok().as_deref(), Some("a"));
        assert_eq!(rx.try_recv().map(|e| e.source).ok().as_deref(), Some("b"));
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.topic(), Topic::Visualization);
    }

    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(8);
        let mut slow_sub = bus.subscribe_to(Topic::Visualization);

        for _ in 0..100 {
            let _ = bus.publish_to(Topic::Visualization, make_event("flood"));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
