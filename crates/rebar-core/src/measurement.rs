use std::sync::{Arc, RwLock};

use image::RgbImage;
use tracing::{debug, warn};

use crate::{
    detector::Instance,
    model::{PixelBox, Segment, Snapshot},
    overlay,
    tiers::TierSet,
};

/// Pixel-to-physical conversion factors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    /// Applied to the diameter used for tier classification.
    pub mm_per_pixel: f64,
    /// Applied to the box extents that feed the volume estimate.
    pub cm_per_pixel: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            mm_per_pixel: 0.1,
            cm_per_pixel: 0.1,
        }
    }
}

/// Turns section detections into measured segments and snapshots.
///
/// The active tier set sits behind a lock so it can be swapped while the
/// engine is shared with the capture worker.
pub struct MeasurementEngine {
    tiers: RwLock<Arc<TierSet>>,
    calibration: Calibration,
    jpeg_quality: u8,
}

impl MeasurementEngine {
    pub fn new(tiers: TierSet, calibration: Calibration, jpeg_quality: u8) -> Self {
        Self {
            tiers: RwLock::new(Arc::new(tiers)),
            calibration,
            jpeg_quality,
        }
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn tiers(&self) -> Arc<TierSet> {
        match self.tiers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace_tiers(&self, tiers: TierSet) {
        let mut guard = match self.tiers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(tiers);
    }

    /// Measure each detection in order; ids are assigned 1, 2, 3...
    pub fn measure(&self, detections: &[Instance]) -> Vec<Segment> {
        let tiers = self.tiers();
        let Calibration {
            mm_per_pixel,
            cm_per_pixel,
        } = self.calibration;

        detections
            .iter()
            .enumerate()
            .map(|(idx, detection)| {
                let bbox = PixelBox::from_corners(detection.bbox);
                let width_px = bbox.width() as f64;
                let height_px = bbox.height() as f64;
                let diameter_mm = width_px.min(height_px) * mm_per_pixel;
                let tier = tiers.classify(diameter_mm);

                let width_cm = width_px * cm_per_pixel;
                let length_cm = height_px * cm_per_pixel;
                // Cross-section treated as square.
                let height_cm = width_cm;

                Segment {
                    id: idx as u32 + 1,
                    size_category: tier.name.clone(),
                    diameter_mm,
                    confidence: detection.score as f64,
                    width_cm,
                    length_cm,
                    height_cm,
                    volume_cc: length_cm * width_cm * height_cm,
                    cement_ratio: tier.ratio.cement,
                    sand_ratio: tier.ratio.sand,
                    aggregate_ratio: tier.ratio.aggregate,
                    bbox,
                }
            })
            .collect()
    }

    pub fn assemble(
        &self,
        timestamp: impl Into<String>,
        segments: Vec<Segment>,
        image: Option<Vec<u8>>,
    ) -> Snapshot {
        Snapshot::new(timestamp, segments, image)
    }

    /// Measure `detections`, render the result overlay and build the snapshot.
    /// A failed overlay leaves the snapshot without an image.
    pub fn analyze(
        &self,
        timestamp: impl Into<String>,
        frame: &RgbImage,
        primary: Option<&Instance>,
        detections: &[Instance],
    ) -> Snapshot {
        let segments = self.measure(detections);
        let masks: Vec<_> = detections.iter().map(|d| d.mask.as_ref()).collect();
        let annotated = overlay::annotate_segments(frame, primary, &segments, &masks);
        let image = match overlay::encode_jpeg(&annotated, self.jpeg_quality) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("result overlay unavailable: {err}");
                None
            }
        };

        let snapshot = self.assemble(timestamp, segments, image);
        debug!(
            segments = snapshot.segments().len(),
            total_volume_cc = snapshot.total_volume_cc(),
            "snapshot assembled"
        );
        metrics::gauge!("rebar_snapshot_segments").set(snapshot.segments().len() as f64);
        snapshot
    }
}
