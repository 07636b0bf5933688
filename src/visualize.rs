use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use burn::prelude::*;
use image::{
    codecs::gif::{GifEncoder, Repeat},
    Frame,
};

use crate::{
    error::Result,
    model::generator::Generator,
    utils::{mosaic, tensor_to_images},
};

/// Predictions are tiled four to a row.
const MOSAIC_COLUMNS: u32 = 4;

pub fn epoch_image_path<P: AsRef<Path>>(dir: P, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("image_at_epoch_{epoch:04}.png"))
}

/// Runs the generator on the fixed test input and writes the montage for `epoch`.
///
/// Expects an inference-mode generator (see `AutodiffModule::valid`) so batch-norm
/// uses its running statistics.
pub fn generate_and_save_images<B: Backend, P: AsRef<Path>>(
    generator: &Generator<B>,
    epoch: usize,
    test_input: Tensor<B, 4>,
    dir: P,
) -> Result<PathBuf> {
    let predictions = generator.forward(test_input);
    let images = tensor_to_images(predictions)?;

    std::fs::create_dir_all(dir.as_ref())?;
    let path = epoch_image_path(dir, epoch);
    mosaic(&images, MOSAIC_COLUMNS).save(&path)?;
    tracing::debug!("saved {}", path.display());

    Ok(path)
}

/// Indices of the frames kept in the progress GIF.
///
/// A frame is kept when `round(2 * sqrt(i))` moves past the last kept value, so early
/// epochs are sampled densely and later ones sparsely. The last frame is repeated
/// at the end so the animation rests on the final result.
pub fn select_gif_frames(count: usize) -> Vec<usize> {
    let mut selected = Vec::new();
    let mut last = -1.0_f64;
    for index in 0..count {
        let frame = 2.0 * (index as f64).sqrt();
        if frame.round() > last.round() {
            last = frame;
            selected.push(index);
        }
    }
    if count > 0 {
        selected.push(count - 1);
    }
    selected
}

/// Sorted epoch montages found in `dir`.
pub fn epoch_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_frame = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("image_at_epoch_") && name.ends_with(".png"))
            .unwrap_or(false);
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Assembles the epoch montages in `frame_dir` into an animated GIF.
///
/// Returns the number of frames written.
pub fn assemble_gif<P: AsRef<Path>, Q: AsRef<Path>>(frame_dir: P, output: Q) -> Result<usize> {
    let frames = epoch_images(frame_dir)?;
    let selected = select_gif_frames(frames.len());

    let mut encoder = GifEncoder::new(BufWriter::new(File::create(output.as_ref())?));
    encoder.set_repeat(Repeat::Infinite)?;
    for &index in &selected {
        let image = image::open(&frames[index])?.to_rgba8();
        encoder.encode_frame(Frame::new(image))?;
    }
    tracing::info!(
        "wrote {} with {} frames",
        output.as_ref().display(),
        selected.len()
    );

    Ok(selected.len())
}
