//! Model construction and weight persistence.

pub mod cnn;

pub use cnn::{apply_final_activation, ImageClassifier, ImageClassifierConfig};

use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::CompactRecorder;
use tracing::info;

use crate::config::RunConfig;
use crate::utils::error::{Result, TrainError};

/// Build the classifier described by a run configuration. Pretrained base
/// weights are applied first; an explicit weights file then overrides the
/// full parameter set.
pub fn build_model<B: Backend>(
    config: &RunConfig,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let model = ImageClassifierConfig::new(config.n_classes)
        .with_ndense(config.ndense)
        .with_dropout(config.dropout)
        .with_base_trainable(config.base_trainable)
        .with_final_activation(config.final_activation)
        .init(device);

    let model = match &config.pretrained {
        Some(path) => load_weights(model, path, device)?,
        None => model,
    };
    match &config.weightfile {
        Some(path) => load_weights(model, path, device),
        None => Ok(model),
    }
}

/// Load a parameter record saved by `save_weights`
pub fn load_weights<B: Backend>(
    model: ImageClassifier<B>,
    path: &Path,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    info!("loading weights from {:?}", path);
    model
        .load_file(path, &CompactRecorder::new(), device)
        .map_err(|e| TrainError::Model(format!("failed to load weights from {:?}: {}", path, e)))
}

/// Persist the full parameter set of the model
pub fn save_weights<B: Backend>(model: &ImageClassifier<B>, path: &Path) -> Result<()> {
    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| TrainError::Model(format!("failed to save weights to {:?}: {}", path, e)))
}
