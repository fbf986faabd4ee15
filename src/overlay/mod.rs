//! Detection overlay.
//!
//! `OverlayRenderer` paints the 3x3 reference grid and one outlined box plus
//! caption per detection onto a `Surface` sized to the video. It redraws when
//! the video geometry or the published detections change.

mod glyphs;
mod raster;

pub use raster::{compose_over, RasterSurface, GLYPH_SCALE};

use image::Rgba;

use crate::detect::{BboxError, BoundingBox, Detection};
use crate::store::DetectionSnapshot;

pub const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);
pub const BOX_LINE_WIDTH: u32 = 3;
pub const LABEL_FILL: Rgba<u8> = Rgba([0, 0, 0, 179]);
pub const LABEL_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const LABEL_HEIGHT: f32 = 30.0;
pub const LABEL_MIN_WIDTH: f32 = 160.0;
pub const GRID_LINE: Rgba<u8> = Rgba([255, 255, 255, 204]);
pub const GRID_LINE_WIDTH: u32 = 2;
pub const GRID_NUMERAL: Rgba<u8> = Rgba([0, 0, 0, 179]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Where a text call's coordinates sit relative to the rendered string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextAnchor {
    /// Left edge, on the baseline.
    Baseline,
    Center,
}

/// 2D drawing target in video pixel coordinates.
pub trait Surface {
    fn size(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32);
    /// Make every pixel fully transparent.
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: Rect, color: Rgba<u8>, line_width: u32);
    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>);
    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>, line_width: u32);
    fn text(&mut self, x: f32, y: f32, text: &str, color: Rgba<u8>, anchor: TextAnchor);
    fn text_width(&self, text: &str) -> u32;
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("bad geometry for '{class}': {source}")]
    Geometry {
        class: String,
        #[source]
        source: BboxError,
    },
}

/// Caption for a detection, e.g. `cup (87%)`.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} ({}%)",
        detection.class,
        (detection.confidence * 100.0).round() as i64
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub drawn: usize,
    pub skipped: usize,
}

pub struct OverlayRenderer<S> {
    surface: S,
    last_drawn: Option<((u32, u32), u64)>,
}

impl<S: Surface> OverlayRenderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            last_drawn: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn needs_redraw(&self, video_size: (u32, u32), snapshot: &DetectionSnapshot) -> bool {
        self.last_drawn != Some((video_size, snapshot.sequence()))
    }

    /// Redraw if the video size or the snapshot changed since the last draw.
    pub fn refresh(
        &mut self,
        video_size: (u32, u32),
        snapshot: &DetectionSnapshot,
    ) -> Option<RenderReport> {
        if !self.needs_redraw(video_size, snapshot) {
            return None;
        }
        let report = self.draw(video_size, snapshot.detections());
        self.last_drawn = Some((video_size, snapshot.sequence()));
        Some(report)
    }

    /// Unconditionally repaint the overlay.
    pub fn draw(&mut self, video_size: (u32, u32), detections: &[Detection]) -> RenderReport {
        let (width, height) = video_size;
        self.surface.resize(width, height);
        self.surface.clear();
        let mut report = RenderReport::default();
        if width == 0 || height == 0 {
            return report;
        }

        self.draw_grid(width as f32, height as f32);
        for detection in detections {
            match self.draw_detection(detection) {
                Ok(()) => report.drawn += 1,
                Err(err) => {
                    log::warn!("skipping detection overlay: {}", err);
                    report.skipped += 1;
                }
            }
        }
        report
    }

    fn draw_grid(&mut self, width: f32, height: f32) {
        let (cell_w, cell_h) = (width / 3.0, height / 3.0);
        for i in 1..3 {
            let y = i as f32 * cell_h;
            self.surface
                .line((0.0, y), (width, y), GRID_LINE, GRID_LINE_WIDTH);
        }
        for i in 1..3 {
            let x = i as f32 * cell_w;
            self.surface
                .line((x, 0.0), (x, height), GRID_LINE, GRID_LINE_WIDTH);
        }
        for row in 0..3 {
            for col in 0..3 {
                let numeral = (row * 3 + col + 1).to_string();
                let cx = col as f32 * cell_w + cell_w / 2.0;
                let cy = row as f32 * cell_h + cell_h / 2.0;
                self.surface
                    .text(cx, cy, &numeral, GRID_NUMERAL, TextAnchor::Center);
            }
        }
    }

    fn draw_detection(&mut self, detection: &Detection) -> Result<(), RenderError> {
        let bbox = BoundingBox::from_raw(&detection.bbox).map_err(|source| {
            RenderError::Geometry {
                class: detection.class.clone(),
                source,
            }
        })?;
        self.surface.stroke_rect(
            Rect::new(bbox.x, bbox.y, bbox.width, bbox.height),
            BOX_COLOR,
            BOX_LINE_WIDTH,
        );

        let text = label_text(detection);
        let label_width = LABEL_MIN_WIDTH.max(self.surface.text_width(&text) as f32 + 20.0);
        let label = Rect::new(bbox.x, bbox.y - LABEL_HEIGHT, label_width, LABEL_HEIGHT);
        self.surface.fill_rect(label, LABEL_FILL);
        self.surface.stroke_rect(label, BOX_COLOR, BOX_LINE_WIDTH);
        self.surface.text(
            bbox.x + 5.0,
            bbox.y - 10.0,
            &text,
            LABEL_TEXT,
            TextAnchor::Baseline,
        );
        Ok(())
    }
}
