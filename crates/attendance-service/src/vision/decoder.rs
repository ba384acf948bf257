//! Base64 image payloads as sent by the browser webcam capture.

use anyhow::{Context, Result};
use base64::Engine;
use image::DynamicImage;

/// Decode a base64 image. Data URLs (`data:image/jpeg;base64,...`) are
/// accepted; everything after the first comma is treated as the payload.
pub fn decode_image(payload: &str) -> Result<DynamicImage> {
    let encoded = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };

    let bytes = base64::prelude::BASE64_STANDARD
        .decode(encoded.trim())
        .context("Failed to decode base64 image")?;

    image::load_from_memory(&bytes).context("Failed to load image")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_base64() -> String {
        let img = RgbImage::from_pixel(8, 6, Rgb([10, 200, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        base64::prelude::BASE64_STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_data_url() {
        let payload = format!("data:image/png;base64,{}", png_base64());
        let img = decode_image(&payload).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[test]
    fn test_decode_bare_base64() {
        let img = decode_image(&png_base64()).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image("data:image/png;base64,!!!not base64!!!").is_err());
        // Valid base64, but not an image
        let text = base64::prelude::BASE64_STANDARD.encode(b"hello world");
        assert!(decode_image(&text).is_err());
    }
}
