//! Training variants generated from each registration face.

use image::{imageops, GrayImage, Luma};
use rand::Rng;

/// Brightness offset for the darker/lighter variants
const BRIGHTNESS_DELTA: i32 = 20;

/// Half-width of the uniform pixel noise (standard deviation of about 10)
const NOISE_AMPLITUDE: i16 = 17;

/// Gaussian sigma of a 3x3 blur kernel
const BLUR_SIGMA: f32 = 0.8;

/// Six training samples per face: original, mirrored, noisy, darker,
/// lighter and slightly blurred.
pub fn variations(face: &GrayImage) -> Vec<GrayImage> {
    vec![
        face.clone(),
        imageops::flip_horizontal(face),
        with_noise(face, &mut rand::thread_rng()),
        imageops::colorops::brighten(face, -BRIGHTNESS_DELTA),
        imageops::colorops::brighten(face, BRIGHTNESS_DELTA),
        imageproc::filter::gaussian_blur_f32(face, BLUR_SIGMA),
    ]
}

fn with_noise<R: Rng>(face: &GrayImage, rng: &mut R) -> GrayImage {
    let mut noisy = face.clone();
    for pixel in noisy.pixels_mut() {
        let offset = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        *pixel = Luma([(pixel[0] as i16 + offset).clamp(0, 255) as u8]);
    }
    noisy
}
