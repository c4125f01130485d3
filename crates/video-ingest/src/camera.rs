//! OpenCV-backed device camera.

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::MatTraitConstManual,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{debug, warn};

use crate::types::{CameraSource, CaptureError, Frame, FrameFormat};

/// Local camera opened by device index, read one frame per call.
pub struct OpenCvCamera {
    capture: Option<VideoCapture>,
    target_size: (i32, i32),
}

impl OpenCvCamera {
    pub fn new(target_size: (u32, u32)) -> Self {
        Self {
            capture: None,
            target_size: (target_size.0 as i32, target_size.1 as i32),
        }
    }
}

impl CameraSource for OpenCvCamera {
    fn open(&mut self, index: u32) -> Result<(), CaptureError> {
        self.release();
        let mut capture = open_video_capture(index)?;
        configure_camera(&mut capture, self.target_size);
        debug!("camera #{index} opened");
        self.capture = Some(capture);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        let capture = self.capture.as_mut().ok_or(CaptureError::NotOpen)?;
        let mut mat = Mat::default();
        let grabbed = capture
            .read(&mut mat)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = mat.size().map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 || size.height <= 0 {
            return Err(CaptureError::Read);
        }
        if mat.channels() != 3 {
            return Err(CaptureError::Other(anyhow!(
                "expected 3-channel frame, got {}",
                mat.channels()
            )));
        }

        let data = mat
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Frame {
            data,
            width: size.width as u32,
            height: size.height as u32,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(err) = capture.release() {
                warn!("camera release failed: {err}");
            }
        }
    }

    fn is_opened(&self) -> bool {
        self.capture
            .as_ref()
            .and_then(|capture| capture.is_opened().ok())
            .unwrap_or(false)
    }
}

impl Drop for OpenCvCamera {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_video_capture(index: u32) -> Result<VideoCapture, CaptureError> {
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index as i32, backend) {
            Ok(capture) => {
                if capture.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(capture);
                }
            }
            Err(err) => {
                warn!("failed to open camera #{index} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open { index })
}

/// Request the capture resolution, preferring MJPG and falling back to YUYV.
fn configure_camera(capture: &mut VideoCapture, target_size: (i32, i32)) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(capture.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = capture.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = capture.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = capture.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
}
