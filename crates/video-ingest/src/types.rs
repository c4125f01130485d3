use image::RgbImage;
use thiserror::Error;

/// Raw frame captured from a camera source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl Frame {
    pub fn from_rgb_image(image: RgbImage, timestamp_ms: i64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp_ms,
            format: FrameFormat::Rgb8,
        }
    }

    /// Convert to an RGB image, swapping channels for BGR sources.
    pub fn to_rgb_image(&self) -> Result<RgbImage, CaptureError> {
        let expected = (self.width as usize) * (self.height as usize) * 3;
        if self.data.len() != expected || expected == 0 {
            return Err(CaptureError::BufferSize {
                expected,
                actual: self.data.len(),
            });
        }
        let data = match self.format {
            FrameFormat::Rgb8 => self.data.clone(),
            FrameFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, data).ok_or(CaptureError::BufferSize {
            expected,
            actual: self.data.len(),
        })
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera #{index}")]
    Open { index: u32 },
    #[error("camera session is not open")]
    NotOpen,
    #[error("camera returned no frame")]
    Read,
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A camera session that is opened, read one frame at a time and released.
pub trait CameraSource: Send {
    fn open(&mut self, index: u32) -> Result<(), CaptureError>;

    fn read(&mut self) -> Result<Frame, CaptureError>;

    fn release(&mut self);

    fn is_opened(&self) -> bool;
}

impl<C: CameraSource + ?Sized> CameraSource for Box<C> {
    fn open(&mut self, index: u32) -> Result<(), CaptureError> {
        (**self).open(index)
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_opened(&self) -> bool {
        (**self).is_opened()
    }
}
