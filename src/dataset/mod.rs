//! Dataset pipeline: discovery, decoding, preprocessing, augmentation,
//! and endless batch generation.

pub mod augment;
pub mod generator;
pub mod loader;
pub mod preprocess;

pub use augment::{Augmenter, FillMode, PixelBuffer};
pub use generator::{DirectoryGenerator, GeneratorOptions, ImageBatch, ImageBatcher, PixelSample};
pub use loader::{scan_class_directories, ImageItem};
pub use preprocess::{PixelPipeline, Preprocessing};
