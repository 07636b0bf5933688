use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{
    error::{Result, SrganError},
    model::shape::FeatureShape,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

// ////////////////////////////////////////////////////////////////////////////
// Dataset

/// One high-resolution image, channels-first, values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub shape: FeatureShape,
}

impl ImageItem {
    pub fn constant(shape: FeatureShape, value: f32) -> Self {
        Self {
            pixels: vec![value; shape.channels * shape.height * shape.width],
            shape,
        }
    }
}

/// Every jpg/png under a directory, resized to the training resolution.
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    items: Vec<ImageItem>,
}

impl ImageFolderDataset {
    pub fn new<P: AsRef<Path>>(root: P, shape: FeatureShape) -> Result<Self> {
        let root = root.as_ref();
        let paths = image_paths(root);
        if paths.is_empty() {
            return Err(SrganError::EmptyDataset(root.to_path_buf()));
        }

        let items = paths
            .iter()
            .map(|path| load_item(path, shape))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("loaded {} images from {}", items.len(), root.display());

        Ok(Self { items })
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

fn image_paths(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(err) => {
                tracing::warn!("skipping unreadable path: {err}");
                None
            }
        })
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

fn load_item(path: &Path, shape: FeatureShape) -> Result<ImageItem> {
    let image = image::open(path)?
        .resize_exact(shape.width as u32, shape.height as u32, FilterType::Triangle)
        .to_rgb32f();

    // HWC -> CHW
    let hwc = image.into_raw();
    let plane = shape.height * shape.width;
    let mut pixels = vec![0.0; shape.channels * plane];
    for (index, value) in hwc.into_iter().enumerate() {
        let channel = index % 3;
        if channel < shape.channels {
            pixels[channel * plane + index / 3] = value;
        }
    }

    Ok(ImageItem { pixels, shape })
}

// ////////////////////////////////////////////////////////////////////////////
// Batcher

/// A batch of high-resolution images in the model range `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct HrBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HrBatcher {}
impl HrBatcher {
    pub fn new() -> Self {
        Self {}
    }
}
impl<B: Backend> Batcher<B, ImageItem, HrBatch<B>> for HrBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> HrBatch<B> {
        let images = items
            .iter()
            .map(|item| {
                let data = TensorData::new(item.pixels.clone(), item.shape.dims());
                Tensor::<B, 3>::from_data(data, device).unsqueeze_dim(0)
            })
            .collect::<Vec<_>>();

        let images = Tensor::cat(images, 0) * 2.0 - 1.0;

        HrBatch {
            images,
            size: items.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use image::{Rgb, RgbImage};

    #[test]
    fn loads_and_resizes_folder_images() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(20, 10, Rgb([255, 0, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 255]))
            .save(dir.path().join("b.PNG"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let shape = FeatureShape::new(3, 16, 16);
        let dataset = ImageFolderDataset::new(dir.path(), shape).unwrap();
        assert_eq!(dataset.len(), 2);

        let red = dataset.get(0).unwrap();
        assert_eq!(red.pixels.len(), 3 * 16 * 16);
        assert!((red.pixels[0] - 1.0).abs() < 1e-4);
        assert!(red.pixels[256].abs() < 1e-4);

        let batch: HrBatch<TestBackend> =
            HrBatcher::new().batch(vec![red, dataset.get(1).unwrap()], &Default::default());
        assert_eq!(batch.images.dims(), [2, 3, 16, 16]);
        assert_eq!(batch.size, 2);

        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0 + 1e-4));
        assert!((values[0] - 1.0).abs() < 1e-4);
        // blue image, blue plane
        assert!((values[768 + 512] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageFolderDataset::new(dir.path(), FeatureShape::new(3, 8, 8));
        assert!(matches!(result, Err(SrganError::EmptyDataset(_))));
    }
}
