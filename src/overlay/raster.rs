use anyhow::{Context, Result};
use image::{DynamicImage, Pixel, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use std::path::Path;

use super::glyphs::{glyph_bits, GLYPH_HEIGHT, GLYPH_WIDTH};
use super::{Rect, Surface, TextAnchor};

/// Each glyph pixel becomes a `GLYPH_SCALE` square.
pub const GLYPH_SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = (GLYPH_WIDTH + 1) * GLYPH_SCALE;

/// Transparent RGBA drawing target.
#[derive(Clone, Debug)]
pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write overlay to {}", path.display()))
    }

    /// Alpha-blend `color` over the pixels of a clipped rectangle.
    fn blend_area(&mut self, left: i64, top: i64, right: i64, bottom: i64, color: Rgba<u8>) {
        let (w, h) = (i64::from(self.image.width()), i64::from(self.image.height()));
        let (left, right) = (left.max(0), right.min(w));
        let (top, bottom) = (top.max(0), bottom.min(h));
        for y in top..bottom {
            for x in left..right {
                self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
            }
        }
    }
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for RasterSurface {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    fn stroke_rect(&mut self, rect: Rect, color: Rgba<u8>, line_width: u32) {
        let (w, h) = (i64::from(self.image.width()), i64::from(self.image.height()));
        if w == 0 || h == 0 {
            return;
        }
        // Edges further out than `pad` cannot reach the surface, so clamping
        // them there keeps every outline within i32 range.
        let pad = i64::from(line_width) + 1;
        let (x, y) = (rect.x.round() as i64, rect.y.round() as i64);
        let right = x.saturating_add(rect.width.round() as i64).min(w + pad);
        let bottom = y.saturating_add(rect.height.round() as i64).min(h + pad);
        let (left, top) = (x.max(-pad), y.max(-pad));
        if right < left || bottom < top {
            return;
        }

        // Strokes straddle the path, so a width of 3 covers one pixel on
        // either side of the outline.
        let half = i64::from(line_width / 2);
        for k in -half..(i64::from(line_width) - half) {
            let (rw, rh) = (right - left - 2 * k, bottom - top - 2 * k);
            if rw <= 0 || rh <= 0 {
                continue;
            }
            let outline = imageproc::rect::Rect::at((left + k) as i32, (top + k) as i32)
                .of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(&mut self.image, outline, color);
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        self.blend_area(
            rect.x.round() as i64,
            rect.y.round() as i64,
            (rect.x + rect.width).round() as i64,
            (rect.y + rect.height).round() as i64,
            color,
        );
    }

    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>, line_width: u32) {
        let half = line_width as f32 / 2.0;
        if from.0 == to.0 {
            let (top, bottom) = (from.1.min(to.1), from.1.max(to.1));
            self.fill_rect(
                Rect::new(from.0 - half, top, line_width as f32, bottom - top),
                color,
            );
        } else if from.1 == to.1 {
            let (left, right) = (from.0.min(to.0), from.0.max(to.0));
            self.fill_rect(
                Rect::new(left, from.1 - half, right - left, line_width as f32),
                color,
            );
        } else {
            draw_line_segment_mut(&mut self.image, from, to, color);
        }
    }

    fn text(&mut self, x: f32, y: f32, text: &str, color: Rgba<u8>, anchor: TextAnchor) {
        let glyph_h = (GLYPH_HEIGHT * GLYPH_SCALE) as f32;
        let (left, top) = match anchor {
            TextAnchor::Baseline => (x, y - glyph_h),
            TextAnchor::Center => (
                x - self.text_width(text) as f32 / 2.0,
                y - glyph_h / 2.0,
            ),
        };
        let (left, top) = (left.round() as i64, top.round() as i64);
        let scale = i64::from(GLYPH_SCALE);
        for (i, ch) in text.chars().enumerate() {
            let origin_x = left.saturating_add(i as i64 * i64::from(GLYPH_ADVANCE));
            for (row, pattern) in glyph_bits(ch).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = origin_x.saturating_add(i64::from(col) * scale);
                    let py = top.saturating_add(row as i64 * scale);
                    self.blend_area(
                        px,
                        py,
                        px.saturating_add(scale),
                        py.saturating_add(scale),
                        color,
                    );
                }
            }
        }
    }

    fn text_width(&self, text: &str) -> u32 {
        match text.chars().count() as u32 {
            0 => 0,
            n => n * GLYPH_ADVANCE - GLYPH_SCALE,
        }
    }
}

/// Blend an overlay on top of a video image, anchored at the top-left.
pub fn compose_over(frame: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let mut base = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    image::imageops::overlay(&mut base, overlay, 0, 0);
    DynamicImage::ImageRgba8(base).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const CYAN: Rgba<u8> = Rgba([0, 255, 255, 255]);

    #[test]
    fn stroke_straddles_the_outline() {
        let mut surface = RasterSurface::new();
        surface.resize(40, 40);
        surface.stroke_rect(Rect::new(10.0, 10.0, 20.0, 20.0), CYAN, 3);

        let img = surface.image();
        for x in [9, 10, 11] {
            assert_eq!(*img.get_pixel(x, 20), CYAN, "x={x}");
        }
        assert_eq!(img.get_pixel(12, 20)[3], 0);
        assert_eq!(img.get_pixel(8, 20)[3], 0);
    }

    #[test]
    fn stroke_clips_extreme_rects() {
        let mut surface = RasterSurface::new();
        surface.resize(40, 40);
        surface.stroke_rect(Rect::new(5.0, 5.0, 3e9, 10.0), CYAN, 3);
        surface.stroke_rect(Rect::new(-3e9, 30.0, 3e9 + 512.0, 5.0), CYAN, 3);
        surface.stroke_rect(Rect::new(f32::MAX, f32::MAX, 1.0, 1.0), CYAN, 3);

        let img = surface.image();
        assert_eq!(*img.get_pixel(39, 5), CYAN);
        assert_eq!(*img.get_pixel(5, 10), CYAN);
        assert_eq!(*img.get_pixel(0, 30), CYAN);
    }

    #[test]
    fn stroke_entirely_off_surface_draws_nothing() {
        let mut surface = RasterSurface::new();
        surface.resize(40, 40);
        surface.stroke_rect(Rect::new(-50.0, -50.0, 20.0, 20.0), CYAN, 3);
        surface.stroke_rect(Rect::new(100.0, 100.0, 20.0, 20.0), CYAN, 3);
        assert!(surface.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn text_far_off_surface_is_ignored() {
        let mut surface = RasterSurface::new();
        surface.resize(20, 20);
        surface.text(f32::MAX, f32::MAX, "cup", CYAN, TextAnchor::Baseline);
        surface.text(-f32::MAX, 10.0, "cup", CYAN, TextAnchor::Center);
        assert!(surface.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn fill_blends_and_clips() {
        let mut surface = RasterSurface::new();
        surface.resize(10, 10);
        surface.fill_rect(Rect::new(-5.0, -5.0, 8.0, 8.0), Rgba([0, 0, 0, 179]));
        assert!((170..=190).contains(&surface.image().get_pixel(2, 2)[3]));
        assert_eq!(surface.image().get_pixel(3, 3)[3], 0);
    }

    #[test]
    fn text_marks_pixels_inside_its_box() {
        let mut surface = RasterSurface::new();
        surface.resize(100, 40);
        let white = Rgba([255, 255, 255, 255]);
        surface.text(5.0, 30.0, "I", white, TextAnchor::Baseline);

        let img = surface.image();
        let lit: Vec<(u32, u32)> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p[3] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!lit.is_empty());
        assert!(lit
            .iter()
            .all(|&(x, y)| (5..15).contains(&x) && (16..30).contains(&y)));
    }

    #[test]
    fn text_width_tracks_char_count() {
        let surface = RasterSurface::new();
        assert_eq!(surface.text_width(""), 0);
        assert_eq!(surface.text_width("cup (87%)"), 9 * 12 - 2);
    }

    #[test]
    fn compose_keeps_video_where_overlay_is_clear() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut overlay = RgbaImage::new(4, 4);
        overlay.put_pixel(1, 1, CYAN);

        let out = compose_over(&frame, &overlay);
        assert_eq!(*out.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*out.get_pixel(1, 1), Rgb([0, 255, 255]));
    }
}
