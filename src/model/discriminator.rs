use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d, Sigmoid,
    },
    prelude::*,
};

use crate::{
    error::ShapeError,
    model::{layers::DiscBlock, shape::FeatureShape},
};

/// Probabilities are kept away from 0 and 1 so the cross-entropy stays finite.
const PROBABILITY_EPSILON: f64 = 1e-5;

#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    in_layer: Conv2d<B>,
    disc_layers: Vec<DiscBlock<B>>,
    pool: AdaptiveAvgPool2d,
    fc_layer: Linear<B>,
    out_layer: Linear<B>,
    lrelu: LeakyRelu,
    sig: Sigmoid,
}
impl<B: Backend> Discriminator<B> {
    /// Returns `[N, 1]` probabilities that each image is a genuine HR image.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = self.in_layer.forward(input);
        let output = self.lrelu.forward(output);

        let output = self
            .disc_layers
            .iter()
            .fold(output, |output, block| block.forward(output));

        let output = self.pool.forward(output).flatten(1, 3);

        let output = self.fc_layer.forward(output);
        let output = self.lrelu.forward(output);
        let output = self.out_layer.forward(output);

        self.sig
            .forward(output)
            .clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 64)]
    pub base_features: usize,
    #[config(default = 1024)]
    pub dense_units: usize,
    /// Spatial size the conv tower is pooled to before the dense head.
    #[config(default = 6)]
    pub head_grid: usize,
}
impl DiscriminatorConfig {
    /// `(out_channels, stride)` for each conv block: k3n64s2 through k3n512s2.
    fn blocks(&self) -> [(usize, usize); 7] {
        let n = self.base_features;
        [
            (n, 2),
            (n * 2, 1),
            (n * 2, 2),
            (n * 4, 1),
            (n * 4, 2),
            (n * 8, 1),
            (n * 8, 2),
        ]
    }

    pub fn init<B: Backend>(
        &self,
        input: FeatureShape,
        device: &B::Device,
    ) -> Result<Discriminator<B>, ShapeError> {
        if self.head_grid == 0 {
            return Err(ShapeError::Invalid {
                stage: "discriminator head".to_string(),
                reason: "head grid must be at least 1x1".to_string(),
            });
        }

        let mut shape = input.conv_same("discriminator entry", self.base_features, 3)?;
        let in_layer = Conv2dConfig::new([input.channels, self.base_features], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let mut disc_layers = Vec::with_capacity(7);
        for (index, (channels, stride)) in self.blocks().into_iter().enumerate() {
            let stage = format!("discriminator block {}", index + 1);
            disc_layers.push(DiscBlock::new([shape.channels, channels], stride, device));
            shape = shape.conv(&stage, channels, 3, stride, 1)?;
        }

        let pool = AdaptiveAvgPool2dConfig::new([self.head_grid, self.head_grid]).init();
        let fc_layer =
            LinearConfig::new(shape.channels * self.head_grid * self.head_grid, self.dense_units)
                .init(device);
        let out_layer = LinearConfig::new(self.dense_units, 1).init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();
        let sig = Sigmoid::new();

        Ok(Discriminator {
            in_layer,
            disc_layers,
            pool,
            fc_layer,
            out_layer,
            lrelu,
            sig,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn widths_double_at_stride_one_blocks() {
        let widths: Vec<_> = DiscriminatorConfig::new()
            .blocks()
            .iter()
            .map(|(channels, _)| *channels)
            .collect();
        assert_eq!(widths, vec![64, 128, 128, 256, 256, 512, 512]);
    }

    #[test]
    fn outputs_one_probability_per_image() {
        let device = Default::default();
        let discriminator = DiscriminatorConfig::new()
            .with_base_features(4)
            .with_dense_units(16)
            .with_head_grid(1)
            .init::<TestBackend>(FeatureShape::new(3, 16, 16), &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([3, 3, 16, 16], &device);
        let output = discriminator.forward(input);
        assert_eq!(output.dims(), [3, 1]);

        for p in output.into_data().to_vec::<f32>().unwrap() {
            assert!(p > 0.0 && p < 1.0);
        }
    }

    #[test]
    fn rejects_empty_head() {
        let result = DiscriminatorConfig::new()
            .with_head_grid(0)
            .init::<TestBackend>(FeatureShape::new(3, 16, 16), &Default::default());
        assert!(result.is_err());
    }
}
