pub mod discriminator;
pub mod downsampler;
pub mod generator;
mod layers;
pub mod shape;
pub mod vgg19;

use burn::prelude::*;

use crate::{
    error::ShapeError,
    model::{
        discriminator::{Discriminator, DiscriminatorConfig},
        downsampler::{Downsampler, DownsamplerConfig},
        generator::{Generator, GeneratorConfig},
        shape::FeatureShape,
    },
};

/// A frozen network whose activations define the perceptual distance.
///
/// Inputs are images in `[0, 1]`; implementations must never be trained.
pub trait FeatureExtractor<B: Backend> {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 1080)]
    pub hr_height: usize,
    #[config(default = 1080)]
    pub hr_width: usize,
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 4)]
    pub downsampling_factor: usize,
    #[config(default = "DownsamplerConfig::new()")]
    pub downsampler: DownsamplerConfig,
    #[config(default = "GeneratorConfig::new()")]
    pub generator: GeneratorConfig,
    #[config(default = "DiscriminatorConfig::new()")]
    pub discriminator: DiscriminatorConfig,
}
impl ModelConfig {
    pub fn hr_shape(&self) -> FeatureShape {
        FeatureShape::new(self.channels, self.hr_height, self.hr_width)
    }

    pub fn lr_shape(&self) -> Result<FeatureShape, ShapeError> {
        self.hr_shape().pool("low resolution", self.downsampling_factor)
    }

    pub fn init_downsampler<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Downsampler<B>, ShapeError> {
        self.downsampler
            .init(self.hr_shape(), self.downsampling_factor, device)
    }

    pub fn init_generator<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Generator<B>, ShapeError> {
        self.generator
            .init(self.hr_shape(), self.downsampling_factor, device)
    }

    pub fn init_discriminator<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Discriminator<B>, ShapeError> {
        self.discriminator.init(self.hr_shape(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::small_model_config, TestBackend};

    #[test]
    fn defaults_describe_1080p_srgan() {
        let config = ModelConfig::new();
        assert_eq!(config.hr_shape().dims(), [3, 1080, 1080]);
        assert_eq!(config.lr_shape().unwrap().dims(), [3, 270, 270]);
        assert_eq!(config.generator.residual_blocks, 16);
    }

    #[test]
    fn generator_inverts_downsampler_shape() {
        let device = Default::default();
        let config = small_model_config();
        let downsampler = config.init_downsampler::<TestBackend>(&device).unwrap();
        let generator = config.init_generator::<TestBackend>(&device).unwrap();

        let hr = Tensor::<TestBackend, 4>::random(
            [2, 3, config.hr_height, config.hr_width],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let sr = generator.forward(downsampler.forward(hr.clone()));
        assert_eq!(sr.dims(), hr.dims());
    }
}
