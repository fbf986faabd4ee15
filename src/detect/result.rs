use serde::{Deserialize, Serialize};

/// Result of one remote detection call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Detections in the order the service reported them.
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub performance: Performance,
}

/// One object reported by the detection service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// `[x, y, width, height]` in pixels of the submitted frame.
    ///
    /// Kept as reported; geometry is validated when drawn (see [`BoundingBox::from_raw`]).
    pub bbox: Vec<f32>,
    /// Grid cell "1".."9". Empty when the service omitted it.
    #[serde(default)]
    pub quadrant: String,
}

/// Service-side statistics for a detection call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default)]
    pub total_detections: u32,
    #[serde(default)]
    pub filtered_detections: u32,
    /// `[width, height]` of the image the service analysed.
    #[serde(default)]
    pub image_size: [u32; 2],
    #[serde(default)]
    pub confidence_threshold: f32,
}

impl DetectionResult {
    /// Derive quadrants for detections the service returned without one.
    ///
    /// Uses the bbox center against `performance.image_size`; detections with
    /// unusable geometry keep an empty quadrant.
    pub fn fill_missing_quadrants(&mut self) {
        let [width, height] = self.performance.image_size;
        if width == 0 || height == 0 {
            return;
        }
        for detection in self.detections.iter_mut() {
            if !detection.quadrant.is_empty() {
                continue;
            }
            if let Ok(bbox) = BoundingBox::from_raw(&detection.bbox) {
                let (cx, cy) = bbox.center();
                detection.quadrant =
                    quadrant_for(cx, cy, width as f32, height as f32).to_string();
            }
        }
    }
}

/// Validated detection geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BboxError {
    #[error("expected 4 bbox values, got {0}")]
    Arity(usize),
    #[error("bbox contains a non-finite value")]
    NonFinite,
    #[error("bbox has negative extent ({width}x{height})")]
    NegativeExtent { width: f32, height: f32 },
}

impl BoundingBox {
    pub fn from_raw(raw: &[f32]) -> Result<Self, BboxError> {
        let [x, y, width, height] =
            <[f32; 4]>::try_from(raw).map_err(|_| BboxError::Arity(raw.len()))?;
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return Err(BboxError::NonFinite);
        }
        if width < 0.0 || height < 0.0 {
            return Err(BboxError::NegativeExtent { width, height });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Cell of a 3x3 grid containing the point, numbered row-major "1".."9".
pub fn quadrant_for(x: f32, y: f32, width: f32, height: f32) -> &'static str {
    const CELLS: [&str; 9] = ["1", "2", "3", "4", "5", "6", "7", "8", "9"];
    let col = band(x, width);
    let row = band(y, height);
    CELLS[row * 3 + col]
}

fn band(value: f32, extent: f32) -> usize {
    if value < extent / 3.0 {
        0
    } else if value < 2.0 * extent / 3.0 {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_requires_four_values() {
        assert_eq!(
            BoundingBox::from_raw(&[1.0, 2.0, 3.0]),
            Err(BboxError::Arity(3))
        );
    }

    #[test]
    fn bbox_rejects_nan_and_negative_extent() {
        assert_eq!(
            BoundingBox::from_raw(&[f32::NAN, 0.0, 1.0, 1.0]),
            Err(BboxError::NonFinite)
        );
        assert!(matches!(
            BoundingBox::from_raw(&[0.0, 0.0, -4.0, 1.0]),
            Err(BboxError::NegativeExtent { .. })
        ));
    }

    #[test]
    fn bbox_edges() {
        let bbox = BoundingBox::from_raw(&[10.0, 20.0, 100.0, 50.0]).unwrap();
        assert_eq!(bbox.right(), 110.0);
        assert_eq!(bbox.bottom(), 70.0);
        assert_eq!(bbox.center(), (60.0, 45.0));
    }

    #[test]
    fn quadrants_are_row_major() {
        assert_eq!(quadrant_for(10.0, 10.0, 640.0, 480.0), "1");
        assert_eq!(quadrant_for(320.0, 10.0, 640.0, 480.0), "2");
        assert_eq!(quadrant_for(630.0, 10.0, 640.0, 480.0), "3");
        assert_eq!(quadrant_for(10.0, 240.0, 640.0, 480.0), "4");
        assert_eq!(quadrant_for(320.0, 240.0, 640.0, 480.0), "5");
        assert_eq!(quadrant_for(320.0, 470.0, 640.0, 480.0), "8");
        assert_eq!(quadrant_for(639.0, 479.0, 640.0, 480.0), "9");
    }

    #[test]
    fn missing_quadrant_is_derived_from_center() {
        let mut result = DetectionResult {
            detections: vec![
                Detection {
                    class: "cup".to_string(),
                    confidence: 0.9,
                    bbox: vec![300.0, 200.0, 40.0, 40.0],
                    quadrant: String::new(),
                },
                Detection {
                    class: "chair".to_string(),
                    confidence: 0.8,
                    bbox: vec![0.0, 0.0, 10.0, 10.0],
                    quadrant: "7".to_string(),
                },
            ],
            performance: Performance {
                image_size: [640, 480],
                ..Performance::default()
            },
        };
        result.fill_missing_quadrants();
        assert_eq!(result.detections[0].quadrant, "5");
        assert_eq!(result.detections[1].quadrant, "7");
    }
}
