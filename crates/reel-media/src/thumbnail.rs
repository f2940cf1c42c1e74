//! Face crops and identity thumbnails.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

use reel_models::{BoundingBox, VideoId};

use crate::error::{MediaError, MediaResult};

/// Side of the square crop kept for every accepted detection.
pub const FACE_CROP_SIZE: u32 = 112;
/// Thumbnails fit inside this square.
pub const THUMBNAIL_SIZE: u32 = 128;
/// Padding applied around a face before cropping.
pub const FACE_CROP_PADDING: f64 = 0.2;

/// Cut a padded face out of a frame and resize it to `FACE_CROP_SIZE` square.
///
/// `None` when the box does not intersect the frame.
pub fn face_crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox
        .pad_ratio(FACE_CROP_PADDING)
        .clip_to_frame(frame.width(), frame.height())?;
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    Some(imageops::resize(
        &crop,
        FACE_CROP_SIZE,
        FACE_CROP_SIZE,
        FilterType::Triangle,
    ))
}

/// Where the thumbnail for identity `label` of `video_id` lives under `work_dir`.
pub fn thumbnail_path(work_dir: &Path, video_id: &VideoId, label: u32) -> PathBuf {
    work_dir
        .join("thumbnails")
        .join(video_id.as_str())
        .join(format!("identity_{}.png", label))
}

/// Resize a face crop to fit `THUMBNAIL_SIZE` and write it as PNG.
pub async fn write_identity_thumbnail(
    crop: &RgbImage,
    work_dir: &Path,
    video_id: &VideoId,
    label: u32,
) -> MediaResult<PathBuf> {
    let path = thumbnail_path(work_dir, video_id, label);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let crop = crop.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let (w, h) = fit_within(crop.width(), crop.height(), THUMBNAIL_SIZE);
        let thumb = imageops::resize(&crop, w, h, FilterType::Lanczos3);
        thumb.save_with_format(&target, image::ImageFormat::Png)?;
        Ok(())
    })
    .await
    .map_err(|e| MediaError::internal(format!("thumbnail task failed: {}", e)))??;

    debug!(label, "Wrote thumbnail {}", path.display());
    Ok(path)
}

/// Largest size with the same aspect ratio whose longer side is `max_side`.
fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_side, max_side);
    }
    let scale = max_side as f64 / width.max(height) as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_face_crop_is_square() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([10, 200, 10]));
        let crop = face_crop(&frame, &BoundingBox::new(300.0, 10.0, 60.0, 80.0)).unwrap();
        assert_eq!(crop.dimensions(), (FACE_CROP_SIZE, FACE_CROP_SIZE));
        assert!(face_crop(&frame, &BoundingBox::new(900.0, 900.0, 60.0, 60.0)).is_none());
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(112, 112, 128), (128, 128));
        assert_eq!(fit_within(200, 100, 128), (128, 64));
        assert_eq!(fit_within(50, 400, 128), (16, 128));
    }

    #[test]
    fn test_thumbnail_path_layout() {
        let path = thumbnail_path(Path::new("/work"), &VideoId::from("v1"), 3);
        assert_eq!(path, PathBuf::from("/work/thumbnails/v1/identity_3.png"));
    }

    #[tokio::test]
    async fn test_write_identity_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let crop = RgbImage::from_pixel(FACE_CROP_SIZE, FACE_CROP_SIZE, Rgb([1, 2, 3]));

        let path = write_identity_thumbnail(&crop, dir.path(), &VideoId::from("vid"), 0)
            .await
            .unwrap();

        assert!(path.ends_with("thumbnails/vid/identity_0.png"));
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (128, 128));
    }
}
