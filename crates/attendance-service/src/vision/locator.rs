use super::{FaceLocator, FaceRect, MIN_FACE_SIZE};
use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage};

/// Share of the shorter frame edge covered by the face square
const DEFAULT_FRAMING_FRACTION: f32 = 0.8;

/// Locator for a fixed kiosk camera where the subject stands centred in
/// frame. Reports one centred square per frame.
#[derive(Debug, Clone)]
pub struct FramingLocator {
    fraction: f32,
    min_size: u32,
}

impl FramingLocator {
    pub fn new() -> Self {
        Self {
            fraction: DEFAULT_FRAMING_FRACTION,
            min_size: MIN_FACE_SIZE,
        }
    }

    pub fn with_fraction(mut self, fraction: f32) -> Self {
        self.fraction = fraction.clamp(0.05, 1.0);
        self
    }

    fn frame_face(&self, width: u32, height: u32) -> Option<FaceRect> {
        let side = (width.min(height) as f32 * self.fraction) as u32;
        if side < self.min_size {
            return None;
        }
        Some(FaceRect::new((width - side) / 2, (height - side) / 2, side, side))
    }
}

impl Default for FramingLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaceLocator for FramingLocator {
    fn id(&self) -> &'static str {
        "framing"
    }

    async fn locate(&self, _frame: &DynamicImage, gray: &GrayImage) -> Result<Vec<FaceRect>> {
        Ok(self
            .frame_face(gray.width(), gray.height())
            .into_iter()
            .collect())
    }
}
