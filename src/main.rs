#![recursion_limit = "256"]

use std::path::Path;

use anyhow::Context;
use burn::{
    backend::Autodiff,
    config::Config,
    data::{dataloader::batcher::Batcher, dataloader::DataLoaderBuilder, dataset::Dataset},
    optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};
use tracing_subscriber::EnvFilter;

use srgan::{
    data::{HrBatch, HrBatcher, ImageFolderDataset},
    model::{vgg19::Vgg19, ModelConfig},
    training::{init_session, TrainingConfig},
    visualize::assemble_gif,
};

#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray<f32>;

/// Number of fixed test images rendered after each epoch.
const TEST_IMAGES: usize = 16;

fn load_config() -> anyhow::Result<TrainingConfig> {
    match std::env::var("SRGAN_CONFIG") {
        Ok(path) => TrainingConfig::load(&path)
            .with_context(|| format!("failed to read training config {path}")),
        Err(_) => Ok(TrainingConfig::new(
            ModelConfig::new(),
            AdamConfig::new(),
            AdamConfig::new(),
        )),
    }
}

fn run<B: AutodiffBackend>(config: TrainingConfig, device: B::Device) -> anyhow::Result<()> {
    let artifact_dir = Path::new(&config.artifact_dir);
    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("failed to create {}", artifact_dir.display()))?;
    config
        .save(artifact_dir.join("config.json"))
        .context("failed to save config")?;

    let hr_shape = config.model.hr_shape();
    let dataset = ImageFolderDataset::new(&config.train_dir, hr_shape)?;
    let loader = DataLoaderBuilder::new(HrBatcher::new())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset);

    let test_hr = match &config.test_dir {
        Some(dir) => {
            let dataset = ImageFolderDataset::new(dir, hr_shape)?;
            let items = dataset.iter().take(TEST_IMAGES).collect();
            let batch: HrBatch<B> = HrBatcher::new().batch(items, &device);
            Some(batch.images)
        }
        None => None,
    };

    let vgg = Vgg19::from_file(&config.feature_weights, &device)
        .context("the perceptual loss needs converted VGG19 weights")?;

    let resume = config.resume;
    let mut session = init_session::<B, _>(config.clone(), vgg, &device)?;
    if resume {
        session = session.resume()?;
    }
    session.train(loader, test_hr)?;

    if config.test_dir.is_some() {
        assemble_gif(artifact_dir, artifact_dir.join("srgan.gif"))?;
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    run::<Autodiff<MyBackend>>(config, Default::default())
}
