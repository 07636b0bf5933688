use burn::prelude::*;
use image::{imageops, RgbImage};

use crate::error::{Result, SrganError};

/// Converts a `[N, C, H, W]` batch in the model range `[-1, 1]` into 8-bit images.
pub fn tensor_to_images<B: Backend>(images: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [batch_size, channels, height, width] = images.dims();

    // Supports both 1 and 3 channels image
    let repeat = match channels {
        1 => 3,
        3 => 1,
        _ => {
            return Err(SrganError::TensorData(format!(
                "cannot render {channels}-channel images"
            )))
        }
    };

    let pixels = ((images + 1.0) / 2.0)
        .clamp(0.0, 1.0)
        .permute([0, 2, 3, 1])
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| SrganError::TensorData(format!("{err:?}")))?;

    pixels
        .chunks_exact(height * width * channels)
        .take(batch_size)
        .map(|image| {
            let bytes = image
                .iter()
                .flat_map(|value| std::iter::repeat_n((value * 255.0).round() as u8, repeat))
                .collect();
            RgbImage::from_raw(width as u32, height as u32, bytes)
                .ok_or_else(|| SrganError::TensorData("image buffer size mismatch".to_string()))
        })
        .collect()
}

/// Lays images out on a grid `ncol` tiles wide, row by row.
pub fn mosaic(images: &[RgbImage], ncol: u32) -> RgbImage {
    let Some(first) = images.first() else {
        return RgbImage::new(0, 0);
    };
    let (width, height) = first.dimensions();
    let ncol = ncol.max(1).min(images.len() as u32);
    let nrow = (images.len() as u32).div_ceil(ncol);

    let mut grid = RgbImage::new(ncol * width, nrow * height);
    for (index, image) in images.iter().enumerate() {
        let index = index as u32;
        let x = (index % ncol) * width;
        let y = (index / ncol) * height;
        imageops::replace(&mut grid, image, x as i64, y as i64);
    }
    grid
}
