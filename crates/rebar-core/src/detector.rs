//! Interface to the instance-detection models.
//!
//! Both the rebar localiser and the section localiser are opaque collaborators
//! that turn an RGB frame into boxes with scores and, optionally, pixel masks.
//! A TorchScript-backed implementation is available with the `with-tch`
//! feature.

use image::RgbImage;
use thiserror::Error;

/// Binary pixel mask covering the analysed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// Build a mask from row-major values; `None` when the length does not
    /// match `width * height`.
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&set| set).count()
    }
}

/// Single detection returned by a model, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    /// `x1, y1, x2, y2`.
    pub bbox: [f32; 4],
    pub score: f32,
    pub mask: Option<Mask>,
}

impl Instance {
    pub fn new(bbox: [f32; 4], score: f32) -> Self {
        Self {
            bbox,
            score,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load model {path:?}: {message}")]
    Load { path: String, message: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// An instance-segmentation model. Implementations return every candidate;
/// score thresholds are applied by the caller.
pub trait InstanceModel: Send {
    fn name(&self) -> &str;

    fn detect(&self, image: &RgbImage) -> Result<Vec<Instance>, DetectorError>;
}

impl<M: InstanceModel + ?Sized> InstanceModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Instance>, DetectorError> {
        (**self).detect(image)
    }
}

#[cfg(feature = "with-tch")]
pub use torch::TorchInstanceModel;

#[cfg(feature = "with-tch")]
mod torch {
    use std::{convert::TryFrom, path::Path};

    use image::RgbImage;
    use tch::{self, Device, IValue, Kind, Tensor};

    use super::{DetectorError, Instance, InstanceModel, Mask};

    const MAX_INSTANCES: usize = 256;

    /// TorchScript export of an instance-segmentation network.
    ///
    /// The module takes a float `[3, H, W]` RGB tensor in `0..=255` and returns
    /// a tuple `(boxes [N, 4], scores [N])` or `(boxes, scores, masks [N, 1, H, W])`.
    pub struct TorchInstanceModel {
        name: String,
        module: tch::CModule,
        device: Device,
    }

    impl TorchInstanceModel {
        pub fn load<P: AsRef<Path>>(name: &str, path: P, use_cpu: bool) -> Result<Self, DetectorError> {
            let device = if use_cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available()
            };
            let module = tch::CModule::load_on_device(path.as_ref(), device).map_err(|err| {
                DetectorError::Load {
                    path: path.as_ref().display().to_string(),
                    message: err.to_string(),
                }
            })?;
            Ok(Self {
                name: name.to_string(),
                module,
                device,
            })
        }

        fn to_tensor(&self, image: &RgbImage) -> Tensor {
            let (width, height) = image.dimensions();
            Tensor::from_slice(image.as_raw())
                .to_device(self.device)
                .to_kind(Kind::Float)
                .view([height as i64, width as i64, 3])
                .permute([2, 0, 1])
        }
    }

    impl InstanceModel for TorchInstanceModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn detect(&self, image: &RgbImage) -> Result<Vec<Instance>, DetectorError> {
            let input = self.to_tensor(image);
            let output = tch::no_grad(|| self.module.forward_is(&[IValue::Tensor(input)]))
                .map_err(|err| DetectorError::Inference(err.to_string()))?;

            let items = match output {
                IValue::Tuple(items) | IValue::GenericList(items) => items,
                other => {
                    return Err(DetectorError::Output(format!(
                        "expected tuple output, got {other:?}"
                    )));
                }
            };
            let mut tensors = items.into_iter().map(|item| match item {
                IValue::Tensor(tensor) => Ok(tensor.to_device(Device::Cpu)),
                other => Err(DetectorError::Output(format!(
                    "expected tensor element, got {other:?}"
                ))),
            });

            let boxes = tensors
                .next()
                .ok_or_else(|| DetectorError::Output("missing boxes tensor".into()))??;
            let scores = tensors
                .next()
                .ok_or_else(|| DetectorError::Output("missing scores tensor".into()))??;
            let masks = tensors.next().transpose()?;

            let boxes: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&boxes.to_kind(Kind::Float))
                .map_err(|err| DetectorError::Output(err.to_string()))?;
            let scores: Vec<f32> = Vec::<f32>::try_from(&scores.to_kind(Kind::Float))
                .map_err(|err| DetectorError::Output(err.to_string()))?;
            if boxes.len() != scores.len() {
                return Err(DetectorError::Output(format!(
                    "{} boxes but {} scores",
                    boxes.len(),
                    scores.len()
                )));
            }

            let (width, height) = image.dimensions();
            let mut instances = Vec::with_capacity(boxes.len().min(MAX_INSTANCES));
            for (idx, (bbox, score)) in boxes.into_iter().zip(scores).enumerate() {
                if bbox.len() < 4 {
                    continue;
                }
                let mut instance = Instance::new([bbox[0], bbox[1], bbox[2], bbox[3]], score);
                if let Some(masks) = masks.as_ref() {
                    let plane = masks
                        .get(idx as i64)
                        .reshape([-1])
                        .gt(0.5)
                        .to_kind(Kind::Uint8);
                    let values: Vec<u8> = Vec::<u8>::try_from(&plane)
                        .map_err(|err| DetectorError::Output(err.to_string()))?;
                    instance.mask =
                        Mask::new(width, height, values.into_iter().map(|v| v != 0).collect());
                }
                instances.push(instance);
                if instances.len() >= MAX_INSTANCES {
                    break;
                }
            }

            Ok(instances)
        }
    }
}
