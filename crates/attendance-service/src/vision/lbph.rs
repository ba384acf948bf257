//! Local binary pattern histogram recognizer.
//!
//! Each face is reduced to circular LBP codes (radius 2, 8 sampling points
//! with bilinear interpolation) which are histogrammed over an 8x8 grid. Every
//! cell histogram is normalised to sum to one. Faces are compared with the
//! alternative chi-square distance, so identical faces score 0 and the worst
//! case is `4 * grid_x * grid_y`.

use super::{FaceMatcher, Prediction};
use anyhow::{anyhow, Context, Result};
use common::snapshot;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::Path;

pub const LBPH_RADIUS: u32 = 2;
pub const LBPH_NEIGHBORS: u32 = 8;
pub const LBPH_GRID: u32 = 8;

/// Trained LBPH model: per-label sample histograms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphMatcher {
    radius: u32,
    neighbors: u32,
    grid_x: u32,
    grid_y: u32,
    samples: BTreeMap<String, Vec<Vec<f32>>>,
}

impl LbphMatcher {
    pub fn new() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID,
            grid_y: LBPH_GRID,
            samples: BTreeMap::new(),
        }
    }

    /// Load a saved model. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(model) = snapshot::read_json::<Self>(path)? else {
            return Ok(None);
        };

        if model.radius != LBPH_RADIUS
            || model.neighbors != LBPH_NEIGHBORS
            || model.grid_x != LBPH_GRID
            || model.grid_y != LBPH_GRID
        {
            return Err(anyhow!(
                "model at {} uses unsupported parameters (radius {}, neighbors {}, grid {}x{})",
                path.display(),
                model.radius,
                model.neighbors,
                model.grid_x,
                model.grid_y
            ));
        }

        Ok(Some(model))
    }

    /// Load a saved model, starting untrained when it is missing or unusable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(model)) => {
                tracing::info!(labels = model.samples.len(), "Loaded existing training data");
                model
            }
            Ok(None) => Self::new(),
            Err(e) => {
                tracing::error!("Error loading training data: {:#}", e);
                Self::new()
            }
        }
    }

    /// Number of stored samples for `label`
    pub fn sample_count(&self, label: &str) -> usize {
        self.samples.get(label).map_or(0, Vec::len)
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// Circular LBP codes for every pixel at least `radius` away from the border
    fn lbp_codes(&self, src: &GrayImage) -> Option<(Vec<u32>, u32, u32)> {
        let (width, height) = src.dimensions();
        if width <= 2 * self.radius || height <= 2 * self.radius {
            return None;
        }

        let r = self.radius as i64;
        let out_w = width - 2 * self.radius;
        let out_h = height - 2 * self.radius;
        let mut codes = vec![0u32; (out_w * out_h) as usize];

        let pixel = |x: i64, y: i64| src.get_pixel(x as u32, y as u32)[0] as f64;

        for n in 0..self.neighbors {
            let angle = 2.0 * PI * n as f64 / self.neighbors as f64;
            let sx = r as f64 * angle.cos();
            let sy = -(r as f64) * angle.sin();

            let fx = sx.floor() as i64;
            let fy = sy.floor() as i64;
            let cx = sx.ceil() as i64;
            let cy = sy.ceil() as i64;

            let tx = sx - fx as f64;
            let ty = sy - fy as f64;
            let w1 = (1.0 - tx) * (1.0 - ty);
            let w2 = tx * (1.0 - ty);
            let w3 = (1.0 - tx) * ty;
            let w4 = tx * ty;

            for y in r..(height as i64 - r) {
                for x in r..(width as i64 - r) {
                    let center = pixel(x, y);
                    let sample = w1 * pixel(x + fx, y + fy)
                        + w2 * pixel(x + cx, y + fy)
                        + w3 * pixel(x + fx, y + cy)
                        + w4 * pixel(x + cx, y + cy);

                    if sample > center || (sample - center).abs() < f64::EPSILON {
                        let idx = ((y - r) as u32 * out_w + (x - r) as u32) as usize;
                        codes[idx] |= 1 << n;
                    }
                }
            }
        }

        Some((codes, out_w, out_h))
    }

    /// Concatenated per-cell histograms, each normalised to sum to one
    fn histogram(&self, face: &GrayImage) -> Result<Vec<f32>> {
        let (codes, width, height) = self.lbp_codes(face).ok_or_else(|| {
            anyhow!(
                "face {}x{} is too small for LBP radius {}",
                face.width(),
                face.height(),
                self.radius
            )
        })?;

        let cell_w = width / self.grid_x;
        let cell_h = height / self.grid_y;
        if cell_w == 0 || cell_h == 0 {
            return Err(anyhow!(
                "face {}x{} is too small for a {}x{} grid",
                face.width(),
                face.height(),
                self.grid_x,
                self.grid_y
            ));
        }

        let bins = self.bins();
        let cell_area = (cell_w * cell_h) as f32;
        let mut result = Vec::with_capacity(bins * (self.grid_x * self.grid_y) as usize);

        for gy in 0..self.grid_y {
            for gx in 0..self.grid_x {
                let mut hist = vec![0f32; bins];
                for y in gy * cell_h..(gy + 1) * cell_h {
                    let row = (y * width) as usize;
                    for x in gx * cell_w..(gx + 1) * cell_w {
                        hist[codes[row + x as usize] as usize] += 1.0;
                    }
                }
                result.extend(hist.into_iter().map(|count| count / cell_area));
            }
        }

        Ok(result)
    }
}

impl Default for LbphMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Alternative chi-square distance: sum of 2(a-b)^2 / (a+b)
fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&a, &b)| {
            let sum = (a + b) as f64;
            if sum > f64::EPSILON {
                let diff = (a - b) as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}

impl FaceMatcher for LbphMatcher {
    fn train(&mut self, label: &str, faces: &[GrayImage]) -> Result<()> {
        if faces.is_empty() {
            return Err(anyhow!("no training faces supplied for label '{}'", label));
        }

        let histograms = faces
            .iter()
            .map(|face| self.histogram(face))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("failed to extract features for label '{}'", label))?;

        tracing::debug!(label, samples = histograms.len(), "Trained LBPH label");
        self.samples.insert(label.to_string(), histograms);
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        let query = match self.histogram(face) {
            Ok(hist) => hist,
            Err(e) => {
                tracing::warn!("Cannot match face: {:#}", e);
                return None;
            }
        };

        let mut best: Option<Prediction> = None;
        for (label, histograms) in &self.samples {
            for hist in histograms {
                let distance = chi_square_alt(&query, hist);
                if best.as_ref().map_or(true, |b| distance < b.distance) {
                    best = Some(Prediction {
                        label: label.clone(),
                        distance,
                    });
                }
            }
        }
        best
    }

    fn label_count(&self) -> usize {
        self.samples.len()
    }

    fn save(&self, path: &Path) -> Result<()> {
        snapshot::write_json(path, self).context("failed to save recognizer model")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::FACE_SIZE;
    use image::Luma;
    use tempfile::TempDir;

    fn stripes() -> GrayImage {
        GrayImage::from_fn(FACE_SIZE, FACE_SIZE, |x, _| {
            Luma([if (x / 10) % 2 == 0 { 40 } else { 220 }])
        })
    }

    fn checker() -> GrayImage {
        GrayImage::from_fn(FACE_SIZE, FACE_SIZE, |x, y| {
            Luma([if ((x / 25) + (y / 25)) % 2 == 0 { 30 } else { 200 }])
        })
    }

    fn gradient() -> GrayImage {
        GrayImage::from_fn(FACE_SIZE, FACE_SIZE, |x, y| Luma([((x * 3 + y * 7) % 256) as u8]))
    }

    #[test]
    fn test_untrained_predicts_nothing() {
        let matcher = LbphMatcher::new();
        assert!(matcher.predict(&stripes()).is_none());
        assert_eq!(matcher.label_count(), 0);
    }

    #[test]
    fn test_identical_face_has_zero_distance() {
        let mut matcher = LbphMatcher::new();
        matcher.train("1", &[stripes()]).unwrap();
        matcher.train("2", &[checker()]).unwrap();

        let prediction = matcher.predict(&stripes()).unwrap();
        assert_eq!(prediction.label, "1");
        assert!(prediction.distance.abs() < 1e-6);

        let prediction = matcher.predict(&checker()).unwrap();
        assert_eq!(prediction.label, "2");
        assert!(prediction.distance.abs() < 1e-6);
    }

    #[test]
    fn test_distance_is_bounded() {
        let matcher = LbphMatcher::new();
        let a = matcher.histogram(&stripes()).unwrap();
        let b = matcher.histogram(&gradient()).unwrap();

        assert_eq!(a.len(), 256 * 64);
        let distance = chi_square_alt(&a, &b);
        assert!(distance > 0.0);
        assert!(distance <= 4.0 * 64.0 + 1e-6);
    }

    #[test]
    fn test_retraining_replaces_label_samples() {
        let mut matcher = LbphMatcher::new();
        matcher.train("1", &[stripes(), checker()]).unwrap();
        matcher.train("2", &[gradient()]).unwrap();
        assert_eq!(matcher.sample_count("1"), 2);

        matcher.train("1", &[gradient()]).unwrap();
        assert_eq!(matcher.sample_count("1"), 1);
        assert_eq!(matcher.sample_count("2"), 1);
        assert_eq!(matcher.label_count(), 2);

        // Stripes are no longer an exact match for anyone
        let prediction = matcher.predict(&stripes()).unwrap();
        assert!(prediction.distance > 0.0);
    }

    #[test]
    fn test_train_rejects_empty_and_tiny_faces() {
        let mut matcher = LbphMatcher::new();
        assert!(matcher.train("1", &[]).is_err());
        assert!(matcher.train("1", &[GrayImage::new(4, 4)]).is_err());
        assert_eq!(matcher.label_count(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trainer.json");

        let mut matcher = LbphMatcher::new();
        matcher.train("42", &[checker()]).unwrap();
        matcher.save(&path).unwrap();

        let loaded = LbphMatcher::load(&path).unwrap().unwrap();
        let prediction = loaded.predict(&checker()).unwrap();
        assert_eq!(prediction.label, "42");

        assert!(LbphMatcher::load(&dir.path().join("missing.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_rejects_foreign_parameters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trainer.json");

        let mut matcher = LbphMatcher::new();
        matcher.radius = 1;
        snapshot::write_json(&path, &matcher).unwrap();

        assert!(LbphMatcher::load(&path).is_err());
        assert_eq!(LbphMatcher::load_or_default(&path).label_count(), 0);
    }
}
