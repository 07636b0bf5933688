use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PRelu, PReluConfig, PaddingConfig2d,
    },
    prelude::*,
};

use crate::{
    error::ShapeError,
    model::{
        layers::{ResidualBlock, UpscaleBlock},
        shape::FeatureShape,
    },
};

/// Number of sub-pixel upsampling stages; each scales by `downsampling_factor / 2`.
const UPSCALE_STAGES: usize = 2;

#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    in_layer: Conv2d<B>,
    in_prelu: PRelu<B>,
    res_layers: Vec<ResidualBlock<B>>,
    post_res_layer: Conv2d<B>,
    batch_norm: BatchNorm<B, 2>,
    up_layers: Vec<UpscaleBlock<B>>,
    out_layer: Conv2d<B>,
}
impl<B: Backend> Generator<B> {
    /// Maps `[N, C, H/f, W/f]` low-resolution images to `[N, C, H, W]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let up_output = self
            .up_layers
            .iter()
            .fold(self.trunk(input), |output, block| block.forward(output));

        self.out_layer.forward(up_output)
    }

    fn entry(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let in_output = self.in_layer.forward(input);
        self.in_prelu.forward(in_output)
    }

    /// Low-resolution features fed to the upsampling stages. The long skip adds
    /// the entry activation, taken before the residual chain.
    fn trunk(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let in_output = self.entry(input);

        let res_output = self
            .res_layers
            .iter()
            .fold(in_output.clone(), |output, block| block.forward(output));

        let post_res_output = self.post_res_layer.forward(res_output);
        let post_res_output = self.batch_norm.forward(post_res_output);

        in_output.add(post_res_output)
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.res_layers.len()
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 64)]
    pub features: usize,
    #[config(default = 16)]
    pub residual_blocks: usize,
    #[config(default = 256)]
    pub upscale_features: usize,
    #[config(default = 9)]
    pub outer_kernel: usize,
}
impl GeneratorConfig {
    /// Composes the generator stages for `target` (channels-first HR shape) and
    /// fails if the stages cannot reproduce it from the downsampled input.
    pub fn validate(&self, target: FeatureShape, factor: usize) -> Result<(), ShapeError> {
        let input = target.pool("generator input", factor)?;

        let entry = input.conv_same("entry conv", self.features, self.outer_kernel)?;

        let mut chain = entry;
        for index in 0..self.residual_blocks {
            let stage = format!("residual block {}", index + 1);
            chain = chain
                .conv_same(&stage, self.features, 3)?
                .conv_same(&stage, self.features, 3)?
                .expect(&stage, chain)?;
        }

        let mut output = chain
            .conv_same("post-residual conv", self.features, 3)?
            .expect("long skip", entry)?;

        for index in 0..UPSCALE_STAGES {
            let stage = format!("upsampling stage {}", index + 1);
            output = output
                .conv_same(&stage, self.upscale_features, 3)?
                .pixel_shuffle(&stage, factor / 2)?;
        }

        output
            .conv_same("exit conv", target.channels, self.outer_kernel)?
            .expect("generator output", target)?;

        Ok(())
    }

    pub fn init<B: Backend>(
        &self,
        target: FeatureShape,
        factor: usize,
        device: &B::Device,
    ) -> Result<Generator<B>, ShapeError> {
        self.validate(target, factor)?;

        let stage_factor = factor / 2;
        let shuffled = self.upscale_features / (stage_factor * stage_factor);

        let in_layer = Conv2dConfig::new(
            [target.channels, self.features],
            [self.outer_kernel, self.outer_kernel],
        )
        .with_padding(PaddingConfig2d::Same)
        .init(device);
        let in_prelu = PReluConfig::new()
            .with_num_parameters(self.features)
            .init(device);

        let res_layers = (0..self.residual_blocks)
            .map(|_| ResidualBlock::new(self.features, device))
            .collect();

        let post_res_layer = Conv2dConfig::new([self.features, self.features], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let batch_norm = BatchNormConfig::new(self.features).init(device);

        let mut up_layers = Vec::with_capacity(UPSCALE_STAGES);
        let mut channels = self.features;
        for _ in 0..UPSCALE_STAGES {
            up_layers.push(UpscaleBlock::new(
                [channels, self.upscale_features],
                stage_factor,
                device,
            ));
            channels = shuffled;
        }

        let out_layer = Conv2dConfig::new(
            [channels, target.channels],
            [self.outer_kernel, self.outer_kernel],
        )
        .with_padding(PaddingConfig2d::Same)
        .init(device);

        Ok(Generator {
            in_layer,
            in_prelu,
            res_layers,
            post_res_layer,
            batch_norm,
            up_layers,
            out_layer,
        })
    }
}
