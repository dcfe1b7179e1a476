use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::Point;

/// Axis-aligned box in pixel space, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One detector output for one object in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    #[serde(alias = "classId")]
    pub class_id: u32,
    /// Resolved by `DetectionFilter`; empty until then.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            class_name: String::new(),
            confidence,
        }
    }

    /// Detection whose box is centred on `center`, handy when only centroids matter.
    pub fn centered(center: Point, class_name: &str, confidence: f32) -> Self {
        Self {
            bbox: BoundingBox {
                x: center.x,
                y: center.y,
                width: 0.0,
                height: 0.0,
            },
            class_id: 0,
            class_name: class_name.to_string(),
            confidence,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.center()
    }
}

/// All detections for one frame. An empty list means nothing was seen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDetections {
    pub index: u64,
    /// Capture time when the source knows it; the pipeline falls back to the wall clock.
    pub timestamp: Option<NaiveDateTime>,
    pub detections: Vec<Detection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_is_box_center() {
        let det = Detection::new(
            BoundingBox {
                x: 10.0,
                y: 20.0,
                width: 30.0,
                height: 40.0,
            },
            0,
            0.9,
        );
        assert_eq!(det.centroid(), Point::new(25.0, 40.0));
    }

    #[test]
    fn deserializes_detector_record_with_camel_case_class() {
        let det: Detection = serde_json::from_str(
            r#"{"x": 0, "y": 0, "width": 4, "height": 2, "classId": 2, "confidence": 0.7}"#,
        )
        .expect("detection");
        assert_eq!(det.class_id, 2);
        assert!(det.class_name.is_empty());
        assert_eq!(det.centroid(), Point::new(2.0, 1.0));
    }
}
