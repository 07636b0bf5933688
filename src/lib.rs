pub mod checkpoint;
pub mod data;
pub mod error;
pub mod loss;
pub mod model;
pub mod training;
pub mod utils;
pub mod visualize;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

#[cfg(test)]
pub(crate) mod test_utils {
    use burn::{
        module::{ModuleVisitor, ParamId},
        nn::pool::{AvgPool2d, AvgPool2dConfig},
        prelude::*,
        record::{FullPrecisionSettings, Record},
        tensor::cast::ToElement,
    };

    use crate::model::{
        discriminator::DiscriminatorConfig, generator::GeneratorConfig, FeatureExtractor,
        ModelConfig,
    };

    /// 16x16 images, factor 4, a few channels per layer.
    pub fn small_model_config() -> ModelConfig {
        ModelConfig::new()
            .with_hr_height(16)
            .with_hr_width(16)
            .with_generator(
                GeneratorConfig::new()
                    .with_features(8)
                    .with_residual_blocks(2)
                    .with_upscale_features(32)
                    .with_outer_kernel(3),
            )
            .with_discriminator(
                DiscriminatorConfig::new()
                    .with_base_features(4)
                    .with_dense_units(16)
                    .with_head_grid(1),
            )
    }

    pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
        tensor.into_scalar().to_f32()
    }

    /// 2x2 average pooling, a cheap stand-in for a pretrained network.
    #[derive(Debug, Clone, Copy)]
    pub struct PooledFeatures;

    impl<B: Backend> FeatureExtractor<B> for PooledFeatures {
        fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
            let pool: AvgPool2d = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
            pool.forward(images)
        }
    }

    #[derive(Default)]
    struct ParamValues {
        values: Vec<Vec<f32>>,
    }

    impl<B: Backend> ModuleVisitor<B> for ParamValues {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            self.values.push(tensor.to_data().to_vec::<f32>().unwrap());
        }
    }

    /// Every float tensor of a module (parameters and running statistics), in visiting order.
    pub fn param_values<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<f32>> {
        let mut visitor = ParamValues::default();
        module.visit(&mut visitor);
        visitor.values
    }

    pub fn max_abs_diff(a: &[Vec<f32>], b: &[Vec<f32>]) -> f32 {
        assert_eq!(a.len(), b.len());
        a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    /// A record as JSON. Maps compare by key, so records keyed by parameter id can be
    /// checked for equality regardless of hash order.
    pub fn record_json<B: Backend, R: Record<B>>(record: R) -> serde_json::Value {
        serde_json::to_value(record.into_item::<FullPrecisionSettings>()).unwrap()
    }

    pub fn assert_tensors_close<B: Backend, const D: usize>(
        actual: Tensor<B, D>,
        expected: Tensor<B, D>,
    ) {
        assert_eq!(actual.dims(), expected.dims());
        let actual = actual.into_data().to_vec::<f32>().unwrap();
        let expected = expected.into_data().to_vec::<f32>().unwrap();
        let diff = actual
            .iter()
            .zip(&expected)
            .map(|(a, e)| (a - e).abs())
            .fold(0.0, f32::max);
        assert!(diff < 1e-5, "tensors differ by {diff}");
    }
}
