use std::{fmt, path::PathBuf, sync::Arc, time::Instant};

use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, cast::ToElement},
};

use crate::{
    checkpoint::{CheckpointManager, CheckpointRecord, TrainingState},
    data::HrBatch,
    error::{Result, SrganError},
    loss::{Criteria, GeneratorLossConfig},
    model::{
        discriminator::Discriminator, downsampler::Downsampler, generator::Generator,
        FeatureExtractor, ModelConfig,
    },
    visualize::generate_and_save_images,
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub gen_optimizer: AdamConfig,
    pub disc_optimizer: AdamConfig,
    #[config(default = "GeneratorLossConfig::default()")]
    pub loss: GeneratorLossConfig,

    #[config(default = 50)]
    pub epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1e-4)]
    pub gen_lr: f64,
    #[config(default = 1e-4)]
    pub disc_lr: f64,

    /// Epochs between checkpoints. Zero disables checkpointing.
    #[config(default = 15)]
    pub checkpoint_period: usize,
    #[config(default = "String::from(\"./training_checkpoints\")")]
    pub checkpoint_dir: String,
    #[config(default = "String::from(\"ckpt\")")]
    pub checkpoint_prefix: String,

    #[config(default = "String::from(\"./images/Train\")")]
    pub train_dir: String,
    /// Images rendered after every epoch, if set.
    pub test_dir: Option<String>,
    #[config(default = "String::from(\"./artifacts\")")]
    pub artifact_dir: String,
    /// Feature extractor record, without the `.mpk` extension.
    #[config(default = "String::from(\"models/vgg19\")")]
    pub feature_weights: String,
    #[config(default = true)]
    pub resume: bool,
}

// ////////////////////////////////////////////////////////////////////////////
// Losses

/// Scalar losses of one step, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepLosses {
    pub discriminator: f32,
    pub generator: f32,
    pub pixel: f32,
    pub adversarial: Option<f32>,
    pub perceptual: Option<f32>,
}

impl StepLosses {
    fn check_finite(&self, epoch: usize, batch: usize) -> Result<()> {
        let model = if !self.discriminator.is_finite() {
            "discriminator"
        } else if !self.generator.is_finite() {
            "generator"
        } else {
            return Ok(());
        };

        Err(SrganError::NonFiniteLoss {
            model,
            epoch,
            batch,
        })
    }
}

impl fmt::Display for StepLosses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "D loss: {:.5}, G loss: {:.5} (pixel {:.5}",
            self.discriminator, self.generator, self.pixel
        )?;
        if let Some(adversarial) = self.adversarial {
            write!(f, ", adversarial {adversarial:.5}")?;
        }
        if let Some(perceptual) = self.perceptual {
            write!(f, ", perceptual {perceptual:.5}")?;
        }
        write!(f, ")")
    }
}

/// Running sums over an epoch. Optional terms stay `None` unless some step reported them.
#[derive(Debug, Default)]
struct EpochLosses {
    batches: usize,
    discriminator: f32,
    generator: f32,
    pixel: f32,
    adversarial: Option<f32>,
    perceptual: Option<f32>,
}

impl EpochLosses {
    fn add(&mut self, losses: &StepLosses) {
        self.batches += 1;
        self.discriminator += losses.discriminator;
        self.generator += losses.generator;
        self.pixel += losses.pixel;
        if let Some(adversarial) = losses.adversarial {
            *self.adversarial.get_or_insert(0.0) += adversarial;
        }
        if let Some(perceptual) = losses.perceptual {
            *self.perceptual.get_or_insert(0.0) += perceptual;
        }
    }

    fn mean(&self) -> StepLosses {
        let n = self.batches.max(1) as f32;
        StepLosses {
            discriminator: self.discriminator / n,
            generator: self.generator / n,
            pixel: self.pixel / n,
            adversarial: self.adversarial.map(|sum| sum / n),
            perceptual: self.perceptual.map(|sum| sum / n),
        }
    }
}

/// Gradients of one step, each scoped to the parameters of its own model.
pub struct StepGradients {
    pub generator: GradientsParams,
    pub discriminator: GradientsParams,
    pub losses: StepLosses,
}

// ////////////////////////////////////////////////////////////////////////////
// Session

/// Owns both models, their optimizers and everything a training run mutates.
pub struct TrainingSession<B, F, OG, OD>
where
    B: AutodiffBackend,
    F: FeatureExtractor<B>,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    config: TrainingConfig,
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    generator_optimizer: OG,
    discriminator_optimizer: OD,
    downsampler: Downsampler<B>,
    extractor: F,
    criteria: Criteria<B>,
    checkpoints: CheckpointManager,
    state: TrainingState,
    device: B::Device,
}

/// Builds a session with the Adam optimizers described by `config`.
pub fn init_session<B, F>(
    config: TrainingConfig,
    extractor: F,
    device: &B::Device,
) -> Result<
    TrainingSession<B, F, impl Optimizer<Generator<B>, B>, impl Optimizer<Discriminator<B>, B>>,
>
where
    B: AutodiffBackend,
    F: FeatureExtractor<B>,
{
    let generator_optimizer = config.gen_optimizer.init::<B, Generator<B>>();
    let discriminator_optimizer = config.disc_optimizer.init::<B, Discriminator<B>>();

    TrainingSession::new(
        config,
        extractor,
        generator_optimizer,
        discriminator_optimizer,
        device,
    )
}

impl<B, F, OG, OD> TrainingSession<B, F, OG, OD>
where
    B: AutodiffBackend,
    F: FeatureExtractor<B>,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    pub fn new(
        config: TrainingConfig,
        extractor: F,
        generator_optimizer: OG,
        discriminator_optimizer: OD,
        device: &B::Device,
    ) -> Result<Self> {
        B::seed(config.seed);

        let generator = config.model.init_generator(device)?;
        let discriminator = config.model.init_discriminator(device)?;
        let downsampler = config.model.init_downsampler(device)?;
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir, &config.checkpoint_prefix);

        Ok(Self {
            generator,
            discriminator,
            generator_optimizer,
            discriminator_optimizer,
            downsampler,
            extractor,
            criteria: Criteria::new(device),
            checkpoints,
            state: TrainingState::default(),
            device: device.clone(),
            config,
        })
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Loads the latest checkpoint, if any, models and optimizers included.
    pub fn resume(mut self) -> Result<Self> {
        let Some(record) = self
            .checkpoints
            .restore_latest::<B, OG::Record, OD::Record>(&self.device)?
        else {
            tracing::info!("starting from scratch");
            return Ok(self);
        };

        self.generator = self.generator.load_record(record.generator);
        self.discriminator = self.discriminator.load_record(record.discriminator);
        self.generator_optimizer = self
            .generator_optimizer
            .load_record(record.generator_optimizer);
        self.discriminator_optimizer = self
            .discriminator_optimizer
            .load_record(record.discriminator_optimizer);
        self.state = record.state;

        tracing::info!(
            "resuming after epoch {} (step {})",
            self.state.epoch,
            self.state.step
        );
        Ok(self)
    }

    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        self.checkpoints.save(CheckpointRecord {
            generator: self.generator.clone().into_record(),
            discriminator: self.discriminator.clone().into_record(),
            generator_optimizer: self.generator_optimizer.to_record(),
            discriminator_optimizer: self.discriminator_optimizer.to_record(),
            state: self.state,
        })
    }

    /// Computes the discriminator and generator gradients for a batch of HR images
    /// without updating either model.
    ///
    /// The discriminator sees the generated batch detached, and the generator is
    /// scored by the same not yet updated discriminator.
    pub fn compute_gradients(&self, hr: Tensor<B, 4>) -> StepGradients {
        let lr = self.downsampler.forward(hr.clone()).detach();
        let generated = self.generator.forward(lr);

        // discriminator
        let real_output = self.discriminator.forward(hr.clone());
        let fake_output = self.discriminator.forward(generated.clone().detach());
        let disc_loss = self.criteria.discriminator_loss(real_output, fake_output);
        let grads = disc_loss.backward();
        let discriminator = GradientsParams::from_grads(grads, &self.discriminator);

        // generator; scored again without the detach so gradients reach the generator
        let fake_output = self.discriminator.forward(generated.clone());
        let gen_loss = self.criteria.generator_loss(
            &self.config.loss,
            generated,
            hr,
            fake_output,
            &self.extractor,
        );
        let grads = gen_loss.total.backward();
        let generator = GradientsParams::from_grads(grads, &self.generator);

        let losses = StepLosses {
            discriminator: disc_loss.into_scalar().to_f32(),
            generator: gen_loss.total.into_scalar().to_f32(),
            pixel: gen_loss.pixel.into_scalar().to_f32(),
            adversarial: gen_loss.adversarial.map(|loss| loss.into_scalar().to_f32()),
            perceptual: gen_loss.perceptual.map(|loss| loss.into_scalar().to_f32()),
        };

        StepGradients {
            generator,
            discriminator,
            losses,
        }
    }

    pub fn apply_generator_gradients(&mut self, grads: GradientsParams) {
        self.generator = self.generator_optimizer.step(
            self.config.gen_lr,
            self.generator.clone(),
            grads,
        );
    }

    pub fn apply_discriminator_gradients(&mut self, grads: GradientsParams) {
        self.discriminator = self.discriminator_optimizer.step(
            self.config.disc_lr,
            self.discriminator.clone(),
            grads,
        );
    }

    /// One full step: gradients for both models, then both updates.
    pub fn train_step(&mut self, hr: Tensor<B, 4>) -> StepLosses {
        let grads = self.compute_gradients(hr);
        self.apply_generator_gradients(grads.generator);
        self.apply_discriminator_gradients(grads.discriminator);
        self.state.step += 1;

        grads.losses
    }

    /// Downsamples fixed HR test images into generator input for visualization.
    pub fn test_input(&self, hr: Tensor<B, 4>) -> Tensor<B::InnerBackend, 4> {
        self.downsampler.forward(hr).inner()
    }

    /// Renders the generator in inference mode on `input`, named after `epoch`.
    pub fn save_images(&self, epoch: usize, input: Tensor<B::InnerBackend, 4>) -> Result<PathBuf> {
        generate_and_save_images(
            &self.generator.valid(),
            epoch,
            input,
            &self.config.artifact_dir,
        )
    }

    /// Trains until `config.epochs` epochs are completed, continuing from the
    /// current state.
    ///
    /// `test_hr` are HR images in `[-1, 1]` rendered after every epoch.
    pub fn train(
        &mut self,
        loader: Arc<dyn DataLoader<B, HrBatch<B>>>,
        test_hr: Option<Tensor<B, 4>>,
    ) -> Result<()> {
        let test_input = test_hr.map(|hr| self.test_input(hr));
        let epochs = self.config.epochs;
        let period = self.config.checkpoint_period;

        for epoch in self.state.epoch..epochs {
            let start = Instant::now();
            let mut totals = EpochLosses::default();

            for (batch_index, batch) in loader.iter().enumerate() {
                let grads = self.compute_gradients(batch.images);
                grads.losses.check_finite(epoch, batch_index)?;
                self.apply_generator_gradients(grads.generator);
                self.apply_discriminator_gradients(grads.discriminator);
                self.state.step += 1;

                tracing::debug!(
                    "[Epoch {}/{}, Batch {}, {} images] {}",
                    epoch + 1,
                    epochs,
                    batch_index,
                    batch.size,
                    grads.losses
                );
                totals.add(&grads.losses);
            }
            self.state.epoch = epoch + 1;

            if let Some(input) = &test_input {
                self.save_images(epoch + 1, input.clone())?;
            }
            if period > 0 && (epoch + 1) % period == 0 {
                self.save_checkpoint()?;
            }

            tracing::info!(
                "Time for epoch {} is {:.2} sec [{}]",
                epoch + 1,
                start.elapsed().as_secs_f64(),
                totals.mean()
            );
        }

        if let Some(input) = test_input {
            self.save_images(epochs, input)?;
        }

        Ok(())
    }
}
