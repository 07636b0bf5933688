use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig,
        PaddingConfig2d,
    },
    prelude::*,
};

/// conv -> batch-norm -> leaky relu, the discriminator's repeating unit.
#[derive(Module, Debug)]
pub struct DiscBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    lrelu: LeakyRelu,
}
impl<B: Backend> DiscBlock<B> {
    pub fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_stride([stride, stride])
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self { conv, bn, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.bn.forward(output);
        self.lrelu.forward(output)
    }
}

/// Widening conv followed by a pixel shuffle, upscaling by `factor`.
#[derive(Module, Debug)]
pub struct UpscaleBlock<B: Backend> {
    conv: Conv2d<B>,
    shuffle: PixelShuffler,
    prelu: PRelu<B>,
}
impl<B: Backend> UpscaleBlock<B> {
    pub fn new(channels: [usize; 2], factor: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let shuffle = PixelShuffler::new(factor);
        let prelu = PReluConfig::new()
            .with_num_parameters(channels[1] / (factor * factor))
            .init(device);

        Self {
            conv,
            shuffle,
            prelu,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.shuffle.forward(output);
        self.prelu.forward(output)
    }
}

/// Sub-pixel rearrangement `[N, C*r*r, H, W] -> [N, C, H*r, W*r]`.
#[derive(Module, Debug, Clone)]
pub struct PixelShuffler {
    factor: usize,
}
impl PixelShuffler {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, height, width] = input.dims();
        let r = self.factor;
        let output_channels = channels / (r * r);

        // [N, C, r_h, r_w, H, W]
        //  -> [N, C, H, r_w, r_h, W]
        //  -> [N, C, H, W, r_h, r_w]
        //  -> [N, C, H, r_h, W, r_w]
        input
            .reshape([batch_size, output_channels, r, r, height, width])
            .swap_dims(2, 4)
            .swap_dims(3, 5)
            .swap_dims(3, 4)
            .reshape([batch_size, output_channels, height * r, width * r])
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    prelu: PRelu<B>,
}
impl<B: Backend> ResidualBlock<B> {
    pub fn new(features: usize, device: &B::Device) -> Self {
        let conv = || {
            Conv2dConfig::new([features, features], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv(),
            bn1: BatchNormConfig::new(features).init(device),
            conv2: conv(),
            bn2: BatchNormConfig::new(features).init(device),
            prelu: PReluConfig::new()
                .with_num_parameters(features)
                .init(device),
        }
    }

    /// Shape preserving; the identity skip adds the untouched block input.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv1.forward(input.clone());
        let output = self.bn1.forward(output);
        let output = self.prelu.forward(output);
        let output = self.conv2.forward(output);
        let output = self.bn2.forward(output);

        input.add(output)
    }
}
