//! Face detection and recognition collaborators.
//!
//! The service only depends on the [`FaceLocator`] and [`FaceMatcher`] traits;
//! the concrete implementations live in the submodules.

pub mod augment;
pub mod debug;
pub mod decoder;
pub mod lbph;
pub mod locator;
pub mod onnx_locator;

use anyhow::Result;
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Side length of a normalised face crop
pub const FACE_SIZE: u32 = 200;

/// Smallest face a locator reports
pub const MIN_FACE_SIZE: u32 = 30;

/// Axis-aligned face rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip the rectangle to a `width` x `height` frame. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRect::new(self.x, self.y, w, h))
    }
}

/// Result of matching one face against the trained model
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Identity candidate
    pub label: String,
    /// Distance to the closest trained sample; lower is better
    pub distance: f64,
}

/// Finds faces in a frame
#[async_trait]
pub trait FaceLocator: Send + Sync {
    /// Locator identifier used in logs and readiness output
    fn id(&self) -> &'static str;

    /// Return face rectangles. `frame` is the decoded colour image and `gray`
    /// its equalised grayscale version of the same size.
    async fn locate(&self, frame: &DynamicImage, gray: &GrayImage) -> Result<Vec<FaceRect>>;

    /// Verify the locator is operational
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Identifies normalised faces; trained incrementally per label
pub trait FaceMatcher: Send + Sync {
    /// Replace every sample for `label` with `faces`. Other labels are kept.
    fn train(&mut self, label: &str, faces: &[GrayImage]) -> Result<()>;

    /// Closest label for `face`, or `None` when nothing has been trained
    fn predict(&self, face: &GrayImage) -> Option<Prediction>;

    /// Number of trained labels
    fn label_count(&self) -> usize;

    /// Write the model to `path`
    fn save(&self, path: &Path) -> Result<()>;
}

/// Grayscale conversion followed by histogram equalisation
pub fn equalized_gray(frame: &DynamicImage) -> GrayImage {
    imageproc::contrast::equalize_histogram(&frame.to_luma8())
}

/// Crop `rect` out of `gray` and resize it to the normalised face size
pub fn normalize_face(gray: &GrayImage, rect: FaceRect) -> Option<GrayImage> {
    let rect = rect.clamp_to(gray.width(), gray.height())?;
    let crop = image::imageops::crop_imm(gray, rect.x, rect.y, rect.width, rect.height).to_image();
    Some(image::imageops::resize(
        &crop,
        FACE_SIZE,
        FACE_SIZE,
        FilterType::Triangle,
    ))
}
