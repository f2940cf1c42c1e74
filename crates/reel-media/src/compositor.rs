//! Frame Compositor: renders one canvas frame from a source frame and a layout.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

use reel_models::{BoundingBox, CanvasSize};

use crate::layout::{LayoutTemplate, Slot};

/// Default padding around an identity box, as a fraction of its size per side.
pub const DEFAULT_PADDING_RATIO: f64 = 0.2;

/// Renders canvas frames of a fixed size.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    canvas: CanvasSize,
    padding_ratio: f64,
    filter: FilterType,
}

impl FrameCompositor {
    pub fn new(canvas: CanvasSize, padding_ratio: f64) -> Self {
        Self {
            canvas,
            padding_ratio: padding_ratio.max(0.0),
            filter: FilterType::Triangle,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    /// Compose one canvas frame.
    ///
    /// `boxes` are the active identities in slot order. With no boxes or a
    /// full-frame template the whole frame is fitted instead.
    pub fn compose(&self, frame: &RgbImage, boxes: &[BoundingBox], template: &LayoutTemplate) -> RgbImage {
        if boxes.is_empty() || template.slots.is_empty() {
            return self.fit_full_frame(frame);
        }

        let tiles: Vec<(Slot, RgbImage)> = template
            .slots
            .par_iter()
            .enumerate()
            .map(|(i, slot)| {
                let region = boxes.get(i).and_then(|bbox| self.crop_region(bbox, frame));
                let tile = match region {
                    Some((x, y, w, h)) => {
                        let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
                        self.scale_to_fill(&crop, slot.width, slot.height)
                    }
                    None => self.scale_to_fill(frame, slot.width, slot.height),
                };
                (*slot, tile)
            })
            .collect();

        let mut canvas = RgbImage::new(self.canvas.width, self.canvas.height);
        for (slot, tile) in &tiles {
            imageops::replace(&mut canvas, tile, slot.x as i64, slot.y as i64);
        }
        canvas
    }

    /// Scale the whole frame to fit inside the canvas, centered on black.
    pub fn fit_full_frame(&self, frame: &RgbImage) -> RgbImage {
        let (cw, ch) = (self.canvas.width, self.canvas.height);
        let (fw, fh) = frame.dimensions();
        if (fw, fh) == (cw, ch) {
            return frame.clone();
        }

        let mut canvas = RgbImage::from_pixel(cw, ch, Rgb([0, 0, 0]));
        if fw == 0 || fh == 0 {
            return canvas;
        }

        let scale = (cw as f64 / fw as f64).min(ch as f64 / fh as f64);
        let nw = ((fw as f64 * scale).round() as u32).clamp(1, cw);
        let nh = ((fh as f64 * scale).round() as u32).clamp(1, ch);
        let resized = imageops::resize(frame, nw, nh, self.filter);

        imageops::replace(
            &mut canvas,
            &resized,
            ((cw - nw) / 2) as i64,
            ((ch - nh) / 2) as i64,
        );
        canvas
    }

    /// Padded, frame-clipped crop rectangle for an identity box.
    pub fn crop_region(&self, bbox: &BoundingBox, frame: &RgbImage) -> Option<(u32, u32, u32, u32)> {
        bbox.pad_ratio(self.padding_ratio)
            .clip_to_frame(frame.width(), frame.height())
    }

    /// Resize to cover `width`x`height` preserving aspect, then center-crop the overflow.
    fn scale_to_fill(&self, image: &RgbImage, width: u32, height: u32) -> RgbImage {
        let (iw, ih) = image.dimensions();
        if (iw, ih) == (width, height) {
            return image.clone();
        }
        if iw == 0 || ih == 0 {
            return RgbImage::new(width, height);
        }

        let scale = (width as f64 / iw as f64).max(height as f64 / ih as f64);
        let sw = ((iw as f64 * scale).ceil() as u32).max(width);
        let sh = ((ih as f64 * scale).ceil() as u32).max(height);
        let resized = imageops::resize(image, sw, sh, self.filter);

        imageops::crop_imm(&resized, (sw - width) / 2, (sh - height) / 2, width, height).to_image()
    }
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new(CanvasSize::default(), DEFAULT_PADDING_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([220, 20, 20]);

    fn compositor() -> FrameCompositor {
        FrameCompositor::new(CanvasSize::new(108, 192), DEFAULT_PADDING_RATIO)
    }

    fn solid(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, RED)
    }

    fn has_black(image: &RgbImage) -> bool {
        image.pixels().any(|p| p.0 == [0, 0, 0])
    }

    #[test]
    fn test_output_is_always_canvas_sized() {
        let compositor = compositor();
        let boxes = vec![
            BoundingBox::new(10.0, 10.0, 30.0, 40.0),
            BoundingBox::new(200.0, 5.0, 5.0, 80.0),
            BoundingBox::new(-50.0, -50.0, 400.0, 20.0),
            BoundingBox::new(300.0, 100.0, 1.0, 1.0),
            BoundingBox::new(0.0, 0.0, 2.0, 2.0),
        ];

        for (fw, fh) in [(320, 180), (180, 320), (1, 1), (1920, 1080), (97, 61)] {
            let frame = solid(fw, fh);
            for count in 0..=boxes.len() {
                let template = LayoutTemplate::for_count(count, compositor.canvas());
                let out = compositor.compose(&frame, &boxes[..count.min(4)], &template);
                assert_eq!(out.dimensions(), (108, 192), "frame {}x{} count {}", fw, fh, count);
            }
        }
    }

    #[test]
    fn test_slots_are_filled_without_letterbox() {
        let compositor = compositor();
        let frame = solid(640, 360);
        // Very wide and very tall boxes both have to cover their slots
        let boxes = vec![
            BoundingBox::new(0.0, 100.0, 600.0, 10.0),
            BoundingBox::new(300.0, 0.0, 8.0, 360.0),
            BoundingBox::new(100.0, 100.0, 50.0, 50.0),
        ];
        let template = LayoutTemplate::for_count(3, compositor.canvas());
        let out = compositor.compose(&frame, &boxes, &template);
        assert!(!has_black(&out));
    }

    #[test]
    fn test_zero_identities_letterbox_wide_frame() {
        let compositor = compositor();
        let frame = solid(320, 180);
        let template = LayoutTemplate::for_count(0, compositor.canvas());
        let out = compositor.compose(&frame, &[], &template);

        assert_eq!(out.dimensions(), (108, 192));
        // Bars above and below, content in the middle
        assert_eq!(out.get_pixel(54, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(54, 191).0, [0, 0, 0]);
        assert_eq!(*out.get_pixel(54, 96), RED);
        assert_eq!(out, compositor.fit_full_frame(&frame));
    }

    #[test]
    fn test_crop_region_pads_and_clips() {
        let compositor = compositor();
        let frame = solid(100, 100);

        let inside = compositor
            .crop_region(&BoundingBox::new(40.0, 40.0, 20.0, 20.0), &frame)
            .unwrap();
        assert_eq!(inside, (36, 36, 28, 28));

        let edge = compositor
            .crop_region(&BoundingBox::new(90.0, -5.0, 20.0, 20.0), &frame)
            .unwrap();
        assert_eq!(edge, (86, 0, 14, 19));

        assert!(compositor
            .crop_region(&BoundingBox::new(500.0, 500.0, 10.0, 10.0), &frame)
            .is_none());
    }

    #[test]
    fn test_single_identity_uses_crop_content() {
        let compositor = compositor();
        let mut frame = RgbImage::from_pixel(200, 200, Rgb([0, 0, 255]));
        for y in 80..120 {
            for x in 80..120 {
                frame.put_pixel(x, y, RED);
            }
        }
        let template = LayoutTemplate::for_count(1, compositor.canvas());
        let out = compositor.compose(&frame, &[BoundingBox::new(85.0, 85.0, 30.0, 30.0)], &template);

        assert_eq!(*out.get_pixel(54, 96), RED);
    }
}
