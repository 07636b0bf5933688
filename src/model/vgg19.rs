// Layer names follow the burn-import conversion of the ONNX VGG19 so the converted
// record loads field for field. Only the convolutional trunk up to pool4 is kept.
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::{
    error::{Result, SrganError},
    model::FeatureExtractor,
};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pretrained VGG19 trunk ending at pool4, used as a frozen perceptual feature map.
#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    conv2d1: Conv2d<B>,
    conv2d2: Conv2d<B>,
    maxpool2d1: MaxPool2d,
    conv2d3: Conv2d<B>,
    conv2d4: Conv2d<B>,
    maxpool2d2: MaxPool2d,
    conv2d5: Conv2d<B>,
    conv2d6: Conv2d<B>,
    conv2d7: Conv2d<B>,
    conv2d8: Conv2d<B>,
    maxpool2d3: MaxPool2d,
    conv2d9: Conv2d<B>,
    conv2d10: Conv2d<B>,
    conv2d11: Conv2d<B>,
    conv2d12: Conv2d<B>,
    maxpool2d4: MaxPool2d,
}

impl<B: Backend> Vgg19<B> {
    /// Randomly initialised trunk; real runs go through [`Vgg19::from_file`].
    pub fn new(device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(true)
                .init(device)
        };
        let pool = || {
            MaxPool2dConfig::new([2, 2])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Valid)
                .init()
        };

        Self {
            conv2d1: conv([3, 64]),
            conv2d2: conv([64, 64]),
            maxpool2d1: pool(),
            conv2d3: conv([64, 128]),
            conv2d4: conv([128, 128]),
            maxpool2d2: pool(),
            conv2d5: conv([128, 256]),
            conv2d6: conv([256, 256]),
            conv2d7: conv([256, 256]),
            conv2d8: conv([256, 256]),
            maxpool2d3: pool(),
            conv2d9: conv([256, 512]),
            conv2d10: conv([512, 512]),
            conv2d11: conv([512, 512]),
            conv2d12: conv([512, 512]),
            maxpool2d4: pool(),
        }
    }

    /// Loads converted weights from `<file>.mpk` and freezes every parameter.
    pub fn from_file<P: AsRef<Path>>(file: P, device: &B::Device) -> Result<Self> {
        let file = file.as_ref();
        let record_path = file.with_extension("mpk");
        if !record_path.exists() {
            return Err(SrganError::MissingFeatureWeights(record_path));
        }

        tracing::info!("loading VGG19 weights from {}", record_path.display());
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = Self::new(device).load_file(PathBuf::from(file), &recorder, device)?;

        Ok(model.no_grad())
    }

    fn normalize(input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = &input.device();
        let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, device).reshape([1, 3, 1, 1]);

        (input - mean) / std
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg19<B> {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = Self::normalize(images);

        let x = relu(self.conv2d1.forward(x));
        let x = relu(self.conv2d2.forward(x));
        let x = self.maxpool2d1.forward(x);

        let x = relu(self.conv2d3.forward(x));
        let x = relu(self.conv2d4.forward(x));
        let x = self.maxpool2d2.forward(x);

        let x = relu(self.conv2d5.forward(x));
        let x = relu(self.conv2d6.forward(x));
        let x = relu(self.conv2d7.forward(x));
        let x = relu(self.conv2d8.forward(x));
        let x = self.maxpool2d3.forward(x);

        let x = relu(self.conv2d9.forward(x));
        let x = relu(self.conv2d10.forward(x));
        let x = relu(self.conv2d11.forward(x));
        let x = relu(self.conv2d12.forward(x));
        self.maxpool2d4.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn missing_weights_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            Vgg19::<TestBackend>::from_file(dir.path().join("vgg19"), &Default::default());

        assert!(matches!(result, Err(SrganError::MissingFeatureWeights(_))));
    }

    #[test]
    fn saved_weights_load_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg19");
        let device = Default::default();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        Vgg19::<TestBackend>::new(&device)
            .save_file(path.clone(), &recorder)
            .unwrap();

        let vgg = Vgg19::<TestBackend>::from_file(&path, &device).unwrap();
        let features = vgg.features(Tensor::zeros([1, 3, 32, 32], &device));
        assert_eq!(features.dims(), [1, 512, 2, 2]);
    }
}
