//! Directory-backed batch generator
//!
//! Streams endless batches from a class-per-subdirectory tree. Each pass
//! over the data rebuilds the sample order (optionally shuffled and
//! oversampled); a batch that reaches the end of one pass wraps into the
//! next, so callers bound iteration by a step count, not by exhaustion.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::dataset::augment::{Augmenter, PixelBuffer};
use crate::dataset::loader::{self, ImageItem};
use crate::dataset::preprocess::PixelPipeline;
use crate::utils::error::{Result, TrainError};

/// One fully preprocessed sample ready for tensor assembly
#[derive(Debug, Clone)]
pub struct PixelSample {
    pub pixels: PixelBuffer,
    pub label: usize,
}

/// A batch of images and integer class targets
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// [batch, 3, height, width]
    pub images: Tensor<B, 4>,
    /// [batch]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks preprocessed samples into device tensors
#[derive(Clone, Debug, Default)]
pub struct ImageBatcher;

impl<B: Backend> Batcher<B, PixelSample, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<PixelSample>, device: &B::Device) -> ImageBatch<B> {
        let batch = items.len();
        let (c, h, w) = {
            let first = &items[0].pixels;
            (first.channels, first.height, first.width)
        };

        let mut flat = Vec::with_capacity(batch * c * h * w);
        let mut labels = Vec::with_capacity(batch);
        for item in items {
            flat.extend_from_slice(&item.pixels.data);
            labels.push(item.label as i64);
        }

        let images = Tensor::from_data(TensorData::new(flat, [batch, c, h, w]), device);
        let targets = Tensor::from_data(TensorData::new(labels, [batch]), device);

        ImageBatch { images, targets }
    }
}

/// Generator behavior knobs, assembled from the run configuration
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub batch_size: usize,
    pub target_size: (u32, u32),
    /// Reshuffle the sample order on every pass
    pub shuffle: bool,
    /// Random augmentation; None streams images unmodified
    pub augment: Option<Augmenter>,
    pub pipeline: PixelPipeline,
    /// Replicate minority classes up to the largest class per pass
    pub oversampling: bool,
    /// Explicit per-class replication factors, overriding balancing
    pub sampling_factor: Option<Vec<f32>>,
    pub seed: u64,
}

/// Endless batch stream over a scanned directory tree
pub struct DirectoryGenerator {
    items: Vec<ImageItem>,
    n_classes: usize,
    options: GeneratorOptions,
    batcher: ImageBatcher,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    cursor: usize,
}

impl DirectoryGenerator {
    /// Scan `root/<class>/` per the class list and prepare the first pass
    pub fn from_directory(
        root: &Path,
        classes: &[String],
        options: GeneratorOptions,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(TrainError::InvalidInput(
                "generator batch_size must be > 0".to_string(),
            ));
        }
        let items = loader::scan_class_directories(root, classes)?;
        let rng = ChaCha8Rng::seed_from_u64(options.seed);

        let mut generator = Self {
            n_classes: classes.len(),
            items,
            options,
            batcher: ImageBatcher,
            rng,
            order: Vec::new(),
            cursor: 0,
        };
        generator.rebuild_order();
        Ok(generator)
    }

    /// Number of distinct samples on disk (ignores oversampling)
    pub fn num_samples(&self) -> usize {
        self.items.len()
    }

    /// Length of one pass over the (possibly oversampled) order
    pub fn epoch_len(&self) -> usize {
        self.order.len()
    }

    /// Per-class sample counts, index-aligned with the class list
    pub fn class_counts(&self) -> Vec<usize> {
        loader::class_counts(&self.items, self.n_classes)
    }

    /// Build the index order for one pass: replicate classes per the
    /// oversampling policy, then shuffle if requested.
    fn rebuild_order(&mut self) {
        let mut order: Vec<usize> = if self.options.oversampling {
            let counts = self.class_counts();
            let max_count = counts.iter().copied().max().unwrap_or(0);
            let mut replicated = Vec::new();
            for (idx, item) in self.items.iter().enumerate() {
                let factor = match &self.options.sampling_factor {
                    Some(factors) => factors[item.label],
                    None => {
                        let count = counts[item.label].max(1);
                        max_count as f32 / count as f32
                    }
                };
                let copies = factor.round().max(1.0) as usize;
                replicated.extend(std::iter::repeat(idx).take(copies));
            }
            replicated
        } else {
            (0..self.items.len()).collect()
        };

        if self.options.shuffle {
            order.shuffle(&mut self.rng);
        }
        debug!("new pass: {} samples in order", order.len());
        self.order = order;
        self.cursor = 0;
    }

    /// Produce the next batch, wrapping into a fresh pass when the current
    /// order is exhausted mid-batch.
    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Result<ImageBatch<B>> {
        let mut samples = Vec::with_capacity(self.options.batch_size);
        while samples.len() < self.options.batch_size {
            if self.cursor >= self.order.len() {
                self.rebuild_order();
            }
            let item = &self.items[self.order[self.cursor]];
            self.cursor += 1;

            let mut pixels = loader::load_pixels(&item.path, self.options.target_size)?;
            if let Some(augmenter) = &self.options.augment {
                pixels = augmenter.apply(&pixels, &mut self.rng);
            }
            self.options.pipeline.apply(&mut pixels);

            samples.push(PixelSample {
                pixels,
                label: item.label,
            });
        }
        Ok(self.batcher.batch(samples, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::preprocess::Preprocessing;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    fn make_dataset(root: &Path, counts: &[(&str, usize)]) {
        for (class, n) in counts {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*n {
                let img = RgbImage::from_pixel(8, 8, Rgb([i as u8 * 10, 50, 100]));
                img.save(dir.join(format!("img_{}.png", i))).unwrap();
            }
        }
    }

    fn options(batch_size: usize) -> GeneratorOptions {
        GeneratorOptions {
            batch_size,
            target_size: (8, 8),
            shuffle: false,
            augment: None,
            pipeline: PixelPipeline {
                truncate_quantile: None,
                ztransform: false,
                preprocessing: Preprocessing::Identity,
                samplewise_center: false,
            },
            oversampling: false,
            sampling_factor: None,
            seed: 2,
        }
    }

    fn classes() -> Vec<String> {
        vec!["normal".to_string(), "special".to_string()]
    }

    #[test]
    fn test_batch_shapes() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 3), ("special", 2)]);

        let mut generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), options(4)).unwrap();
        let device = Default::default();
        let batch = generator.next_batch::<NdArray>(&device).unwrap();

        assert_eq!(batch.images.dims(), [4, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [4]);
    }

    #[test]
    fn test_wraps_around_when_pass_is_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 2), ("special", 1)]);

        // 3 samples, batch of 2: second batch must wrap into a new pass
        let mut generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), options(2)).unwrap();
        let device = Default::default();
        for _ in 0..4 {
            let batch = generator.next_batch::<NdArray>(&device).unwrap();
            assert_eq!(batch.images.dims()[0], 2);
        }
    }

    #[test]
    fn test_unshuffled_order_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 2), ("special", 2)]);

        let mut generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), options(4)).unwrap();
        let device = Default::default();
        let batch = generator.next_batch::<NdArray>(&device).unwrap();
        let labels = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(labels, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_oversampling_balances_classes() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 4), ("special", 1)]);

        let mut opts = options(2);
        opts.oversampling = true;
        let generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), opts).unwrap();

        // minority class replicated to match the majority: 4 + 4
        assert_eq!(generator.epoch_len(), 8);
        assert_eq!(generator.num_samples(), 5);
    }

    #[test]
    fn test_explicit_sampling_factor() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 3), ("special", 2)]);

        let mut opts = options(2);
        opts.oversampling = true;
        opts.sampling_factor = Some(vec![1.0, 3.0]);
        let generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), opts).unwrap();

        // 3 * 1 + 2 * 3
        assert_eq!(generator.epoch_len(), 9);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 5), ("special", 5)]);

        let mut opts = options(10);
        opts.shuffle = true;

        let device = Default::default();
        let mut gen_a =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), opts.clone()).unwrap();
        let mut gen_b =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), opts).unwrap();

        let labels_a = gen_a
            .next_batch::<NdArray>(&device)
            .unwrap()
            .targets
            .into_data()
            .to_vec::<i64>()
            .unwrap();
        let labels_b = gen_b
            .next_batch::<NdArray>(&device)
            .unwrap()
            .targets
            .into_data()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(labels_a, labels_b);
    }

    #[test]
    fn test_class_counts() {
        let tmp = tempfile::tempdir().unwrap();
        make_dataset(tmp.path(), &[("normal", 3), ("special", 2)]);

        let generator =
            DirectoryGenerator::from_directory(tmp.path(), &classes(), options(2)).unwrap();
        assert_eq!(generator.class_counts(), vec![3, 2]);
    }
}
