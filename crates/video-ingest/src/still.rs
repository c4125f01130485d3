//! Camera stand-in that serves the same image file on every read.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use image::RgbImage;
use tracing::debug;

use crate::types::{CameraSource, CaptureError, Frame};

pub struct StillImageSource {
    path: PathBuf,
    image: Option<RgbImage>,
}

impl StillImageSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            image: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CameraSource for StillImageSource {
    /// The index is ignored; the file is decoded on open.
    fn open(&mut self, index: u32) -> Result<(), CaptureError> {
        let image = image::open(&self.path)
            .with_context(|| format!("failed to decode {}", self.path.display()))?
            .to_rgb8();
        debug!(
            "still image {} loaded as camera #{index} ({}x{})",
            self.path.display(),
            image.width(),
            image.height()
        );
        self.image = Some(image);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        let image = self.image.as_ref().ok_or(CaptureError::NotOpen)?;
        Ok(Frame::from_rgb_image(
            image.clone(),
            Utc::now().timestamp_millis(),
        ))
    }

    fn release(&mut self) {
        self.image = None;
    }

    fn is_opened(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use image::Rgb;

    use super::*;

    #[test]
    fn replays_the_file_until_released() {
        let dir = env::temp_dir().join(format!("still-source-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");
        RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])).save(&path).unwrap();

        let mut source = StillImageSource::new(&path);
        assert!(matches!(source.read(), Err(CaptureError::NotOpen)));

        source.open(0).unwrap();
        assert!(source.is_opened());
        let frame = source.read().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.to_rgb_image().unwrap().get_pixel(3, 3), &Rgb([10, 20, 30]));

        source.release();
        assert!(!source.is_opened());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_fails_to_open() {
        let mut source = StillImageSource::new("/nonexistent/rebar.jpg");
        assert!(matches!(source.open(0), Err(CaptureError::Other(_))));
        assert!(!source.is_opened());
    }
}
