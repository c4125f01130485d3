//! Two-stage detection: find the rebar, then its cross-sections.

use std::time::Instant;

use image::{RgbImage, imageops};
use rebar_core::{DetectorError, Instance, InstanceModel};
use tracing::{debug, info};

/// Result of one detection pass over a frame.
#[derive(Debug)]
pub enum DetectionOutcome {
    /// No rebar candidate cleared the detection threshold.
    NoPrimaryObject,
    /// A rebar was found but none of its sections cleared the section threshold.
    NoSegments { primary: Instance },
    /// Sections in detection order.
    Segments {
        primary: Instance,
        segments: Vec<Instance>,
    },
}

/// The analysed (possibly downscaled) frame and what was found in it.
#[derive(Debug)]
pub struct Detections {
    pub frame: RgbImage,
    pub outcome: DetectionOutcome,
}

pub struct DetectionPipeline {
    primary: Box<dyn InstanceModel>,
    segments: Box<dyn InstanceModel>,
    segment_threshold: f32,
    max_dimension: u32,
}

impl DetectionPipeline {
    pub fn new(
        primary: Box<dyn InstanceModel>,
        segments: Box<dyn InstanceModel>,
        segment_threshold: f32,
        max_dimension: u32,
    ) -> Self {
        Self {
            primary,
            segments,
            segment_threshold,
            max_dimension,
        }
    }

    /// Run both stages. `detection_threshold` gates the rebar stage and is
    /// read from the device settings for every run.
    pub fn run(&self, image: &RgbImage, detection_threshold: f64) -> Result<Detections, DetectorError> {
        let frame = downscale(image, self.max_dimension);

        let started = Instant::now();
        let candidates: Vec<Instance> = self
            .primary
            .detect(&frame)?
            .into_iter()
            .filter(|candidate| candidate.score as f64 >= detection_threshold)
            .collect();
        metrics::histogram!("rebar_stage_latency_seconds", "stage" => "primary")
            .record(started.elapsed().as_secs_f64());

        let Some(primary) = select_primary(candidates) else {
            info!("no rebar detected (threshold {detection_threshold:.2})");
            return Ok(Detections {
                frame,
                outcome: DetectionOutcome::NoPrimaryObject,
            });
        };
        debug!(score = primary.score, bbox = ?primary.bbox, "rebar selected");

        let started = Instant::now();
        let segments: Vec<Instance> = self
            .segments
            .detect(&frame)?
            .into_iter()
            .filter(|segment| segment.score >= self.segment_threshold)
            .collect();
        metrics::histogram!("rebar_stage_latency_seconds", "stage" => "segments")
            .record(started.elapsed().as_secs_f64());

        let outcome = if segments.is_empty() {
            info!("no rebar sections detected");
            DetectionOutcome::NoSegments { primary }
        } else {
            debug!("{} sections detected", segments.len());
            DetectionOutcome::Segments { primary, segments }
        };
        Ok(Detections { frame, outcome })
    }
}

/// Highest score wins; the earliest candidate wins a tie.
fn select_primary(candidates: Vec<Instance>) -> Option<Instance> {
    let mut best: Option<Instance> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Shrink proportionally so the longer side is at most `max_dimension`.
fn downscale(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_dimension {
        return image.clone();
    }
    let scale = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * scale) as u32).max(1);
    let new_height = ((height as f64 * scale) as u32).max(1);
    debug!("resized image for analysis: {width}x{height} -> {new_width}x{new_height}");
    imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Model returning a fixed candidate list and recording input sizes.
    pub(crate) struct FixedModel {
        pub(crate) instances: Vec<Instance>,
        pub(crate) seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FixedModel {
        pub(crate) fn boxed(instances: Vec<Instance>) -> Box<dyn InstanceModel> {
            Box::new(Self {
                instances,
                seen: Arc::default(),
            })
        }
    }

    impl InstanceModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, image: &RgbImage) -> Result<Vec<Instance>, DetectorError> {
            self.seen.lock().unwrap().push(image.dimensions());
            Ok(self.instances.clone())
        }
    }

    struct FailingModel;

    impl InstanceModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<Instance>, DetectorError> {
            Err(DetectorError::Inference("device lost".into()))
        }
    }

    fn frame(width: u32, height: u32) -> RgbImage {
        RgbImage::new(width, height)
    }

    #[test]
    fn candidates_below_threshold_mean_no_rebar() {
        let pipeline = DetectionPipeline::new(
            FixedModel::boxed(vec![Instance::new([0.0, 0.0, 10.0, 10.0], 0.69)]),
            FixedModel::boxed(vec![Instance::new([0.0, 0.0, 5.0, 5.0], 0.9)]),
            0.5,
            800,
        );
        let detections = pipeline.run(&frame(100, 100), 0.7).unwrap();
        assert!(matches!(detections.outcome, DetectionOutcome::NoPrimaryObject));
    }

    #[test]
    fn highest_score_wins_and_ties_keep_first() {
        let candidates = vec![
            Instance::new([0.0, 0.0, 1.0, 1.0], 0.8),
            Instance::new([1.0, 1.0, 2.0, 2.0], 0.95),
            Instance::new([2.0, 2.0, 3.0, 3.0], 0.95),
        ];
        let best = select_primary(candidates).unwrap();
        assert_eq!(best.bbox, [1.0, 1.0, 2.0, 2.0]);
        assert!(select_primary(Vec::new()).is_none());
    }

    #[test]
    fn weak_sections_are_dropped_in_order() {
        let pipeline = DetectionPipeline::new(
            FixedModel::boxed(vec![Instance::new([0.0, 0.0, 50.0, 50.0], 0.9)]),
            FixedModel::boxed(vec![
                Instance::new([0.0, 0.0, 5.0, 5.0], 0.7),
                Instance::new([5.0, 5.0, 9.0, 9.0], 0.3),
                Instance::new([9.0, 9.0, 20.0, 20.0], 0.5),
            ]),
            0.5,
            800,
        );
        let detections = pipeline.run(&frame(100, 100), 0.7).unwrap();
        match detections.outcome {
            DetectionOutcome::Segments { segments, .. } => {
                let scores: Vec<f32> = segments.iter().map(|s| s.score).collect();
                assert_eq!(scores, vec![0.7, 0.5]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn rebar_without_sections_is_reported() {
        let pipeline = DetectionPipeline::new(
            FixedModel::boxed(vec![Instance::new([0.0, 0.0, 50.0, 50.0], 0.9)]),
            FixedModel::boxed(vec![Instance::new([0.0, 0.0, 5.0, 5.0], 0.2)]),
            0.5,
            800,
        );
        let detections = pipeline.run(&frame(100, 100), 0.7).unwrap();
        assert!(matches!(detections.outcome, DetectionOutcome::NoSegments { .. }));
    }

    #[test]
    fn large_frames_are_downscaled_before_both_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let primary = FixedModel {
            instances: vec![Instance::new([0.0, 0.0, 50.0, 50.0], 0.9)],
            seen: seen.clone(),
        };
        let segments = FixedModel {
            instances: Vec::new(),
            seen: seen.clone(),
        };
        let pipeline = DetectionPipeline::new(Box::new(primary), Box::new(segments), 0.5, 800);
        let detections = pipeline.run(&frame(1600, 1200), 0.5).unwrap();
        assert_eq!(detections.frame.dimensions(), (800, 600));
        assert_eq!(*seen.lock().unwrap(), vec![(800, 600), (800, 600)]);
    }

    #[test]
    fn model_errors_propagate() {
        let pipeline = DetectionPipeline::new(
            Box::new(FailingModel),
            FixedModel::boxed(Vec::new()),
            0.5,
            800,
        );
        assert!(matches!(
            pipeline.run(&frame(10, 10), 0.5),
            Err(DetectorError::Inference(_))
        ));
    }
}
