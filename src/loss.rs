use burn::{
    nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
};

use crate::model::FeatureExtractor;

/// Weights balancing the composite generator loss against the unweighted pixel MSE.
#[derive(Config, Debug, PartialEq)]
pub struct LossWeights {
    #[config(default = 1e-3)]
    pub adversarial: f64,
    #[config(default = 2e-6)]
    pub perceptual: f64,
}

/// Which generator objective to optimize.
#[derive(Config, Debug, PartialEq)]
pub enum GeneratorLossConfig {
    /// Pixel MSE only, for pretraining the generator before the adversarial phase.
    PixelOnly,
    /// Pixel MSE plus weighted adversarial and perceptual terms.
    Composite(LossWeights),
}

impl Default for GeneratorLossConfig {
    fn default() -> Self {
        Self::Composite(LossWeights::new())
    }
}

/// Generator loss and its individual terms, already weighted.
#[derive(Clone, Debug)]
pub struct GeneratorLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub pixel: Tensor<B, 1>,
    pub adversarial: Option<Tensor<B, 1>>,
    pub perceptual: Option<Tensor<B, 1>>,
}

/// Binary cross-entropy and MSE criteria shared by both objectives.
#[derive(Debug)]
pub struct Criteria<B: Backend> {
    bce: BinaryCrossEntropyLoss<B>,
    mse: MseLoss,
}

impl<B: Backend> Criteria<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            bce: BinaryCrossEntropyLossConfig::new().init(device),
            mse: MseLoss::new(),
        }
    }

    fn bce_against(&self, probabilities: Tensor<B, 2>, label: i64) -> Tensor<B, 1> {
        let targets =
            Tensor::<B, 2, Int>::full(probabilities.dims(), label, &probabilities.device());
        self.bce.forward(probabilities, targets)
    }

    /// `BCE(real, 1) + BCE(fake, 0)`. The two terms are summed, not averaged.
    pub fn discriminator_loss(
        &self,
        real_output: Tensor<B, 2>,
        fake_output: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        self.bce_against(real_output, 1) + self.bce_against(fake_output, 0)
    }

    pub fn pixel_loss(&self, generated: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        self.mse.forward(generated, target, Reduction::Mean)
    }

    /// Feature-space MSE. Both images go from `[-1, 1]` to the extractor's `[0, 1]`.
    pub fn perceptual_loss<F: FeatureExtractor<B>>(
        &self,
        generated: Tensor<B, 4>,
        target: Tensor<B, 4>,
        extractor: &F,
    ) -> Tensor<B, 1> {
        let generated_features = extractor.features((generated + 1.0) / 2.0);
        let target_features = extractor.features((target + 1.0) / 2.0);

        self.mse
            .forward(generated_features, target_features, Reduction::Mean)
    }

    pub fn generator_loss<F: FeatureExtractor<B>>(
        &self,
        config: &GeneratorLossConfig,
        generated: Tensor<B, 4>,
        target: Tensor<B, 4>,
        fake_output: Tensor<B, 2>,
        extractor: &F,
    ) -> GeneratorLoss<B> {
        match config {
            GeneratorLossConfig::PixelOnly => {
                let pixel = self.pixel_loss(generated, target);
                GeneratorLoss {
                    total: pixel.clone(),
                    pixel,
                    adversarial: None,
                    perceptual: None,
                }
            }
            GeneratorLossConfig::Composite(weights) => {
                let adversarial = self.bce_against(fake_output, 1) * weights.adversarial;
                let pixel = self.pixel_loss(generated.clone(), target.clone());
                let perceptual =
                    self.perceptual_loss(generated, target, extractor) * weights.perceptual;

                GeneratorLoss {
                    total: pixel.clone() + perceptual.clone() + adversarial.clone(),
                    pixel,
                    adversarial: Some(adversarial),
                    perceptual: Some(perceptual),
                }
            }
        }
    }
}
