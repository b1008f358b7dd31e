//! Stateless router between the two joint-command sources.

use binpick_types::{ControlSource, PickError};
use nalgebra::DVector;

/// Forwards the joint command of whichever source the planner selected.
#[derive(Debug, Default, Clone, Copy)]
pub struct MotionModeSwitch;

impl MotionModeSwitch {
    pub fn new() -> Self {
        Self
    }

    /// Pick the command matching `selector`.
    ///
    /// # Errors
    ///
    /// [`PickError::MissingCommand`] when the selected source produced
    /// nothing this tick.
    pub fn forward<'a>(
        &self,
        selector: ControlSource,
        diff_ik: Option<&'a DVector<f64>>,
        position: Option<&'a DVector<f64>>,
    ) -> Result<&'a DVector<f64>, PickError> {
        let chosen = match selector {
            ControlSource::DiffIk => diff_ik,
            ControlSource::Position => position,
        };
        chosen.ok_or_else(|| PickError::MissingCommand(format!("{selector} source has no joint command")))
    }
}
