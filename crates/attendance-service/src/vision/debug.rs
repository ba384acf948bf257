//! Annotated copies of recognition frames for troubleshooting detection.

use super::FaceRect;
use anyhow::{Context, Result};
use chrono::Local;
use image::{DynamicImage, Rgb};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use std::path::{Path, PathBuf};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw a two-pixel green box around each face and save the frame as
/// `detected_<timestamp>.png` in `dir`
pub fn write_annotated_frame(dir: &Path, frame: &DynamicImage, faces: &[FaceRect]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create debug image directory {}", dir.display()))?;

    let mut canvas = frame.to_rgb8();
    for face in faces {
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(face.x as i32, face.y as i32).of_size(face.width.max(1), face.height.max(1)),
            BOX_COLOR,
        );
        if face.width > 2 && face.height > 2 {
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(face.x as i32 + 1, face.y as i32 + 1)
                    .of_size(face.width - 2, face.height - 2),
                BOX_COLOR,
            );
        }
    }

    let path = dir.join(format!(
        "detected_{}.png",
        Local::now().format("%Y%m%d_%H%M%S_%3f")
    ));
    canvas
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_box_is_drawn() {
        let dir = TempDir::new().unwrap();
        let frame = DynamicImage::new_rgb8(64, 64);
        let path =
            write_annotated_frame(dir.path(), &frame, &[FaceRect::new(10, 10, 20, 20)]).unwrap();

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*saved.get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*saved.get_pixel(11, 15), BOX_COLOR);
        assert_eq!(*saved.get_pixel(20, 20), Rgb([0, 0, 0]));
    }
}
