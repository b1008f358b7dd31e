//! `binpick-middleware` – event routing for the pick-and-place core.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`visualizer`] – Fire-and-forget debug-marker sink used by perception
//!   and planning.

pub mod bus;
pub mod visualizer;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use visualizer::{BusVisualizer, NullVisualizer, Visualizer};
