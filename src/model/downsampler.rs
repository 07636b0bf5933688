use burn::{
    nn::pool::{AvgPool2d, AvgPool2dConfig},
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions, TensorData},
};

use crate::{error::ShapeError, model::shape::FeatureShape};

/// 2D Gaussian mask matching MATLAB's `fspecial('gaussian', shape, sigma)`.
///
/// Row-major, `shape[0]` rows of `shape[1]` weights. Weights smaller than
/// `f64::EPSILON` times the peak are zeroed and the rest normalized to sum to one.
pub fn gaussian_kernel(shape: [usize; 2], sigma: f64) -> Vec<Vec<f64>> {
    let m = (shape[0] as f64 - 1.0) / 2.0;
    let n = (shape[1] as f64 - 1.0) / 2.0;

    let mut kernel: Vec<Vec<f64>> = (0..shape[0])
        .map(|row| {
            let y = row as f64 - m;
            (0..shape[1])
                .map(|col| {
                    let x = col as f64 - n;
                    (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
                })
                .collect()
        })
        .collect();

    let max = kernel.iter().flatten().copied().fold(0.0, f64::max);
    let threshold = f64::EPSILON * max;
    for weight in kernel.iter_mut().flatten() {
        if *weight < threshold {
            *weight = 0.0;
        }
    }

    let sum: f64 = kernel.iter().flatten().sum();
    if sum != 0.0 {
        for weight in kernel.iter_mut().flatten() {
            *weight /= sum;
        }
    }

    kernel
}

#[derive(Config, Debug)]
pub struct DownsamplerConfig {
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 0.5)]
    pub sigma: f64,
}
impl DownsamplerConfig {
    pub fn init<B: Backend>(
        &self,
        input: FeatureShape,
        factor: usize,
        device: &B::Device,
    ) -> Result<Downsampler<B>, ShapeError> {
        let output = input
            .conv_same("blur", input.channels, self.kernel_size)?
            .pool("downsample", factor)?;

        let k = self.kernel_size;
        let weights: Vec<f32> = gaussian_kernel([k, k], self.sigma)
            .into_iter()
            .flatten()
            .map(|w| w as f32)
            .collect();
        // Same mask for every channel: [C, 1, k, k] depthwise weights.
        let kernel = Tensor::<B, 4>::from_data(TensorData::new(weights, [1, 1, k, k]), device)
            .repeat_dim(0, input.channels);

        let pool = AvgPool2dConfig::new([factor, factor])
            .with_strides([factor, factor])
            .init();

        Ok(Downsampler {
            kernel,
            pool,
            padding: k / 2,
            input,
            output,
        })
    }
}

/// Fixed blur-and-decimate operator producing the generator's inputs.
///
/// Holds no parameters: the blur kernel is a constant tensor, so nothing here can be
/// reached by an optimizer.
#[derive(Debug, Clone)]
pub struct Downsampler<B: Backend> {
    kernel: Tensor<B, 4>,
    pool: AvgPool2d,
    padding: usize,
    input: FeatureShape,
    output: FeatureShape,
}
impl<B: Backend> Downsampler<B> {
    /// `[N, C, H, W] -> [N, C, H / f, W / f]`. The input has to match the configured
    /// high-resolution shape.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, height, width] = input.dims();
        debug_assert_eq!([channels, height, width], self.input.dims());

        let options = ConvOptions::new(
            [1, 1],
            [self.padding, self.padding],
            [1, 1],
            self.input.channels,
        );
        let blurred = conv2d(input, self.kernel.clone(), None, options);

        self.pool.forward(blurred)
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn gaussian_kernel_3x3() {
        let kernel = gaussian_kernel([3, 3], 0.5);
        assert_eq!(kernel.len(), 3);
        assert!(kernel.iter().all(|row| row.len() == 3));

        let sum: f64 = kernel.iter().flatten().sum();
        assert!((sum - 1.0).abs() < 1e-6);

        for row in 0..3 {
            for col in 0..3 {
                assert!((kernel[row][col] - kernel[col][row]).abs() < 1e-12);
                assert!((kernel[row][col] - kernel[2 - row][2 - col]).abs() < 1e-12);
                assert!(kernel[row][col] <= kernel[1][1]);
            }
        }
        // Edge neighbours weigh exp(-2) relative to the centre.
        assert!((kernel[0][1] / kernel[1][1] - (-2.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn tiny_weights_are_zeroed() {
        let kernel = gaussian_kernel([9, 9], 0.3);
        assert_eq!(kernel[0][0], 0.0);
        let sum: f64 = kernel.iter().flatten().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn full_size_frame_is_quartered() {
        let device = Default::default();
        let downsampler = DownsamplerConfig::new()
            .init::<TestBackend>(FeatureShape::new(3, 1080, 1080), 4, &device)
            .unwrap();
        assert_eq!(downsampler.output_shape().dims(), [3, 270, 270]);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 1080, 1080], &device);
        assert_eq!(downsampler.forward(input).dims(), [1, 3, 270, 270]);
    }

    #[test]
    fn constant_interior_is_preserved() {
        let device = Default::default();
        let downsampler = DownsamplerConfig::new()
            .init::<TestBackend>(FeatureShape::new(2, 16, 16), 4, &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::full([1, 2, 16, 16], 0.5, &device);
        let output = downsampler.forward(input);
        assert_eq!(output.dims(), [1, 2, 4, 4]);

        // Pool windows away from the zero-padded border see only the constant.
        let values = output.into_data().to_vec::<f32>().unwrap();
        for channel in 0..2 {
            for (row, col) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
                let value = values[channel * 16 + row * 4 + col];
                assert!((value - 0.5).abs() < 1e-5, "got {value}");
            }
        }
    }

    #[test]
    fn rejects_indivisible_frames() {
        let result = DownsamplerConfig::new().init::<TestBackend>(
            FeatureShape::new(3, 30, 32),
            4,
            &Default::default(),
        );
        assert!(matches!(result, Err(ShapeError::Indivisible { .. })));
    }
}
