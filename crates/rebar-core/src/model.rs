use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixels, serialised as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Truncate detector output (`x1, y1, x2, y2` as floats) to whole pixels.
    pub fn from_corners(bbox: [f32; 4]) -> Self {
        Self {
            x1: bbox[0] as i32,
            y1: bbox[1] as i32,
            x2: bbox[2] as i32,
            y2: bbox[3] as i32,
        }
    }

    /// Horizontal extent; inverted boxes measure zero.
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1).max(0) as u32
    }

    /// Vertical extent; inverted boxes measure zero.
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1).max(0) as u32
    }
}

impl From<[i32; 4]> for PixelBox {
    fn from(value: [i32; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(value: PixelBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

/// Cement:sand:aggregate parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixRatio {
    pub cement: u32,
    pub sand: u32,
    pub aggregate: u32,
}

impl MixRatio {
    pub const fn new(cement: u32, sand: u32, aggregate: u32) -> Self {
        Self {
            cement,
            sand,
            aggregate,
        }
    }
}

/// One measured rebar cross-section.
///
/// Field names follow the JSON contract shared with the relay and the report
/// writer, hence `section_id` and the flattened ratio fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "section_id")]
    pub id: u32,
    pub size_category: String,
    pub diameter_mm: f64,
    pub confidence: f64,
    pub width_cm: f64,
    pub length_cm: f64,
    pub height_cm: f64,
    pub volume_cc: f64,
    #[serde(default)]
    pub cement_ratio: u32,
    #[serde(default)]
    pub sand_ratio: u32,
    #[serde(default)]
    pub aggregate_ratio: u32,
    pub bbox: PixelBox,
}

impl Segment {
    pub fn mix_ratio(&self) -> MixRatio {
        MixRatio::new(self.cement_ratio, self.sand_ratio, self.aggregate_ratio)
    }
}

/// Immutable result of one analysis run.
///
/// `total_volume_cc` is computed from the segments at construction and cannot
/// be set independently.
#[derive(Clone, Debug)]
pub struct Snapshot {
    timestamp: String,
    segments: Vec<Segment>,
    total_volume_cc: f64,
    image: Option<Arc<[u8]>>,
}

impl Snapshot {
    pub fn new(timestamp: impl Into<String>, segments: Vec<Segment>, image: Option<Vec<u8>>) -> Self {
        let total_volume_cc = segments.iter().map(|segment| segment.volume_cc).sum();
        Self {
            timestamp: timestamp.into(),
            segments,
            total_volume_cc,
            image: image.map(Arc::from),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_volume_cc(&self) -> f64 {
        self.total_volume_cc
    }

    /// Encoded (JPEG) annotated result image, if one was rendered.
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn image_available(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: u32, volume_cc: f64) -> Segment {
        Segment {
            id,
            size_category: "small".into(),
            diameter_mm: 2.0,
            confidence: 0.9,
            width_cm: 0.2,
            length_cm: 0.4,
            height_cm: 0.2,
            volume_cc,
            cement_ratio: 1,
            sand_ratio: 2,
            aggregate_ratio: 3,
            bbox: PixelBox::new(10, 10, 30, 50),
        }
    }

    #[test]
    fn snapshot_total_is_sum_of_segment_volumes() {
        let snapshot = Snapshot::new(
            "20240101-120000-000",
            vec![segment(1, 0.016), segment(2, 0.125), segment(3, 1.5)],
            None,
        );
        assert!((snapshot.total_volume_cc() - 1.641).abs() < 1e-9);
        assert!(!snapshot.image_available());
    }

    #[test]
    fn empty_snapshot_has_zero_volume() {
        let snapshot = Snapshot::new("t", Vec::new(), Some(vec![1, 2, 3]));
        assert_eq!(snapshot.total_volume_cc(), 0.0);
        assert_eq!(snapshot.image(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn segment_json_uses_report_field_names() {
        let value = serde_json::to_value(segment(1, 0.016)).unwrap();
        assert_eq!(value["section_id"], 1);
        assert_eq!(value["cement_ratio"], 1);
        assert_eq!(value["aggregate_ratio"], 3);
        assert_eq!(value["bbox"], serde_json::json!([10, 10, 30, 50]));
        assert!(value.get("id").is_none());
    }

    #[test]
    fn segment_without_ratios_still_parses() {
        let json = r#"{
            "section_id": 2, "size_category": "medium", "diameter_mm": 14.0,
            "confidence": 0.8, "width_cm": 1.0, "length_cm": 2.0,
            "height_cm": 1.0, "volume_cc": 2.0, "bbox": [0, 0, 10, 20]
        }"#;
        let parsed: Segment = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, 2);
        assert_eq!(parsed.mix_ratio(), MixRatio::new(0, 0, 0));
        assert_eq!(parsed.bbox.height(), 20);
    }

    #[test]
    fn inverted_box_measures_zero() {
        let bbox = PixelBox::new(30, 50, 10, 10);
        assert_eq!(bbox.width(), 0);
        assert_eq!(bbox.height(), 0);
        assert_eq!(PixelBox::from_corners([1.9, 2.2, 10.7, 4.0]), PixelBox::new(1, 2, 10, 4));
    }
}
