use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{discriminator::DiscriminatorRecord, generator::GeneratorRecord},
};

const STATE_FILE: &str = "state.json";

/// Progress counters stored next to the model records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Completed epochs.
    pub epoch: usize,
    /// Completed optimizer steps.
    pub step: usize,
}

/// Everything needed to resume a run.
///
/// `GO` and `DO` are the generator and discriminator optimizer records.
pub struct CheckpointRecord<B: Backend, GO, DO> {
    pub generator: GeneratorRecord<B>,
    pub discriminator: DiscriminatorRecord<B>,
    pub generator_optimizer: GO,
    pub discriminator_optimizer: DO,
    pub state: TrainingState,
}

/// Writes checkpoints to `<dir>/<prefix>-<tag>/`.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    prefix: String,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            recorder: NamedMpkFileRecorder::new(),
        }
    }

    pub fn path_for(&self, tag: usize) -> PathBuf {
        self.dir.join(format!("{}-{}", self.prefix, tag))
    }

    /// Saves under `state.epoch`. The state file is written last, so a directory
    /// without one is an interrupted save and never counts as a checkpoint.
    pub fn save<B, GO, DO>(&self, record: CheckpointRecord<B, GO, DO>) -> Result<PathBuf>
    where
        B: Backend,
        GO: Record<B>,
        DO: Record<B>,
    {
        let path = self.path_for(record.state.epoch);
        std::fs::create_dir_all(&path)?;

        Recorder::<B>::record(&self.recorder, record.generator, path.join("generator"))?;
        Recorder::<B>::record(
            &self.recorder,
            record.discriminator,
            path.join("discriminator"),
        )?;
        Recorder::<B>::record(
            &self.recorder,
            record.generator_optimizer,
            path.join("generator_optimizer"),
        )?;
        Recorder::<B>::record(
            &self.recorder,
            record.discriminator_optimizer,
            path.join("discriminator_optimizer"),
        )?;

        let state = serde_json::to_string_pretty(&record.state)?;
        std::fs::write(path.join(STATE_FILE), state)?;

        tracing::info!("saved checkpoint {}", path.display());
        Ok(path)
    }

    /// Highest complete checkpoint tag, if any.
    pub fn latest(&self) -> Result<Option<usize>> {
        if !self.dir.exists() {
            return Ok(None);
        }

        let prefix = format!("{}-", self.prefix);
        let mut latest = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(tag) = name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|tag| tag.parse::<usize>().ok())
            else {
                continue;
            };
            if entry.path().join(STATE_FILE).is_file() {
                latest = latest.max(Some(tag));
            }
        }

        Ok(latest)
    }

    pub fn restore<B, GO, DO>(
        &self,
        tag: usize,
        device: &B::Device,
    ) -> Result<CheckpointRecord<B, GO, DO>>
    where
        B: Backend,
        GO: Record<B>,
        DO: Record<B>,
    {
        let path = self.path_for(tag);
        let state = std::fs::read_to_string(path.join(STATE_FILE))?;

        let record = CheckpointRecord {
            generator: self.recorder.load(path.join("generator"), device)?,
            discriminator: self.recorder.load(path.join("discriminator"), device)?,
            generator_optimizer: self.recorder.load(path.join("generator_optimizer"), device)?,
            discriminator_optimizer: self
                .recorder
                .load(path.join("discriminator_optimizer"), device)?,
            state: serde_json::from_str(&state)?,
        };

        tracing::info!("restored checkpoint {}", path.display());
        Ok(record)
    }

    /// Restores the highest tag, or `None` when no checkpoint was written yet.
    pub fn restore_latest<B, GO, DO>(
        &self,
        device: &B::Device,
    ) -> Result<Option<CheckpointRecord<B, GO, DO>>>
    where
        B: Backend,
        GO: Record<B>,
        DO: Record<B>,
    {
        match self.latest()? {
            Some(tag) => self.restore(tag, device).map(Some),
            None => {
                tracing::info!("no checkpoint under {}", self.dir.display());
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{discriminator::Discriminator, generator::Generator},
        test_utils::{param_values, record_json, small_model_config},
        TestAutodiffBackend,
    };
    use burn::{
        optim::{AdamConfig, GradientsParams, Optimizer},
        tensor::Distribution,
    };

    #[test]
    fn latest_ignores_foreign_and_incomplete_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "ckpt");
        assert_eq!(manager.latest().unwrap(), None);

        for tag in [15, 30, 9] {
            let path = manager.path_for(tag);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join(STATE_FILE), "{}").unwrap();
        }
        // interrupted save
        std::fs::create_dir_all(manager.path_for(45)).unwrap();
        std::fs::create_dir_all(dir.path().join("other-99")).unwrap();
        std::fs::create_dir_all(dir.path().join("ckpt-final")).unwrap();

        assert_eq!(manager.latest().unwrap(), Some(30));
    }

    #[test]
    fn restores_saved_models_and_state() {
        type B = TestAutodiffBackend;
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "ckpt");

        let config = small_model_config();
        let mut generator: Generator<B> = config.init_generator(&device).unwrap();
        let mut discriminator: Discriminator<B> = config.init_discriminator(&device).unwrap();
        let mut generator_optimizer = AdamConfig::new().init::<B, Generator<B>>();
        let mut discriminator_optimizer = AdamConfig::new().init::<B, Discriminator<B>>();

        // One step each, so both optimizers hold moment estimates.
        let lr = Tensor::<B, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let grads = generator.forward(lr).powf_scalar(2.0).mean().backward();
        let grads = GradientsParams::from_grads(grads, &generator);
        generator = generator_optimizer.step(1e-3, generator, grads);

        let hr = Tensor::<B, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let grads = discriminator.forward(hr).mean().backward();
        let grads = GradientsParams::from_grads(grads, &discriminator);
        discriminator = discriminator_optimizer.step(1e-3, discriminator, grads);

        let untouched = AdamConfig::new().init::<B, Generator<B>>();
        assert_ne!(
            record_json(generator_optimizer.to_record()),
            record_json(untouched.to_record())
        );

        let state = TrainingState { epoch: 15, step: 120 };

        let path = manager
            .save(CheckpointRecord {
                generator: generator.clone().into_record(),
                discriminator: discriminator.clone().into_record(),
                generator_optimizer: generator_optimizer.to_record(),
                discriminator_optimizer: discriminator_optimizer.to_record(),
                state,
            })
            .unwrap();
        assert_eq!(path, dir.path().join("ckpt-15"));
        for file in [
            "generator.mpk",
            "discriminator.mpk",
            "generator_optimizer.mpk",
            "discriminator_optimizer.mpk",
            "state.json",
        ] {
            assert!(path.join(file).is_file(), "{file} missing");
        }

        let record = manager
            .restore_latest::<B, _, _>(&device)
            .unwrap()
            .unwrap();
        assert_eq!(record.state, state);

        let fresh: Generator<B> = config.init_generator(&device).unwrap();
        let fresh = fresh.load_record(record.generator);
        assert_eq!(param_values(&fresh), param_values(&generator));

        let fresh: Discriminator<B> = config.init_discriminator(&device).unwrap();
        let fresh = fresh.load_record(record.discriminator);
        assert_eq!(param_values(&fresh), param_values(&discriminator));

        let restored = AdamConfig::new()
            .init::<B, Generator<B>>()
            .load_record(record.generator_optimizer);
        assert_eq!(
            record_json(restored.to_record()),
            record_json(generator_optimizer.to_record())
        );

        let restored = AdamConfig::new()
            .init::<B, Discriminator<B>>()
            .load_record(record.discriminator_optimizer);
        assert_eq!(
            record_json(restored.to_record()),
            record_json(discriminator_optimizer.to_record())
        );
    }

    #[test]
    fn restore_latest_without_checkpoints_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("missing"), "ckpt");

        let record = manager
            .restore_latest::<TestAutodiffBackend, (), ()>(&Default::default())
            .unwrap();
        assert!(record.is_none());
    }
}
