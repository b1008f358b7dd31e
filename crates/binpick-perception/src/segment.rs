//! Text-prompted instance segmentation seam.
//!
//! A [`Segmenter`] turns an RGB image and a text prompt ("mug", "red box")
//! into scored [`Detection`]s. The model behind it is external; this module
//! only owns the contract and picks the best usable detection.

use binpick_hal::RgbImage;
use binpick_types::PickError;
use tracing::debug;

/// Row-major binary mask, same resolution as the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; (width * height) as usize],
        }
    }

    pub fn get(&self, row: u32, col: u32) -> bool {
        row < self.height
            && col < self.width
            && self.data.get((row * self.width + col) as usize).copied().unwrap_or(false)
    }

    pub fn set(&mut self, row: u32, col: u32, value: bool) {
        if row < self.height && col < self.width {
            if let Some(px) = self.data.get_mut((row * self.width + col) as usize) {
                *px = value;
            }
        }
    }

    /// Set pixels as `(row, col)`, in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width.max(1);
        self.data
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(move |(i, _)| (i as u32 / width, i as u32 % width))
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|set| *set)
    }
}

/// One instance returned by a [`Segmenter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub mask: Mask,
    /// `[x_min, y_min, x_max, y_max]` in pixels.
    pub bbox: [f32; 4],
    /// The phrase the model matched.
    pub phrase: String,
    pub score: f32,
}

/// A text-prompted instance segmenter.
pub trait Segmenter: Send + Sync {
    /// Detections for `prompt` in `image`, in any order. An empty vector means
    /// nothing matched.
    fn predict(&self, image: &RgbImage, prompt: &str) -> Result<Vec<Detection>, PickError>;
}

/// Run `segmenter` and return the highest-scoring detection with a
/// non-empty mask. Ties go to the earlier detection.
///
/// # Errors
///
/// [`PickError::NoTargetDetected`] when the model returns nothing usable.
pub fn acquire_target_mask(
    segmenter: &dyn Segmenter,
    image: &RgbImage,
    prompt: &str,
) -> Result<Detection, PickError> {
    let detections = segmenter.predict(image, prompt)?;
    debug!(prompt, count = detections.len(), "segmenter returned");
    detections
        .into_iter()
        .filter(|d| !d.mask.is_empty())
        .reduce(|best, d| if d.score.total_cmp(&best.score).is_gt() { d } else { best })
        .ok_or_else(|| PickError::NoTargetDetected {
            prompt: prompt.to_string(),
        })
}
