//! Convolutional classifier
//!
//! A compact feature extractor topped by a pooled classification head:
//! global average pooling, an optional stack of hidden dense layers,
//! dropout, and a final projection to one logit per class (a single logit
//! in binary mode). The loss operates on raw logits; the final activation
//! is applied only when probabilities are requested.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::module::Ignored;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::prelude::*;

use crate::config::FinalActivation;

/// Channel progression of the convolutional base
const BASE_CHANNELS: [usize; 4] = [3, 32, 64, 128];
const HIDDEN_UNITS: usize = 1024;

/// One conv / norm / relu / pool stage
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

/// Classifier hyperparameters
#[derive(Config, Debug)]
pub struct ImageClassifierConfig {
    /// Output width of the head; 1 in binary mode
    pub n_classes: usize,
    /// Number of hidden dense layers between pooling and the head
    #[config(default = 0)]
    pub ndense: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// When false, gradients stop at the pooled features so only the
    /// dense head trains
    #[config(default = true)]
    pub base_trainable: bool,
    /// Activation converting logits to probabilities at prediction time
    #[config(default = "FinalActivation::Sigmoid")]
    pub final_activation: FinalActivation,
}

impl ImageClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        let blocks = BASE_CHANNELS
            .windows(2)
            .map(|io| ConvBlock::new(io[0], io[1], device))
            .collect();

        let feature_width = *BASE_CHANNELS.last().unwrap();
        let mut hidden = Vec::with_capacity(self.ndense);
        let mut in_features = feature_width;
        for _ in 0..self.ndense {
            hidden.push(LinearConfig::new(in_features, HIDDEN_UNITS).init(device));
            in_features = HIDDEN_UNITS;
        }

        ImageClassifier {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden,
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(in_features, self.n_classes).init(device),
            base_trainable: self.base_trainable,
            final_activation: Ignored(self.final_activation),
        }
    }
}

/// Convolutional base plus dense classification head
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    hidden: Vec<Linear<B>>,
    activation: Relu,
    dropout: Dropout,
    head: Linear<B>,
    base_trainable: bool,
    final_activation: Ignored<FinalActivation>,
}

impl<B: Backend> ImageClassifier<B> {
    /// Raw logits: [batch, n_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.global_pool.forward(x);
        let mut x = x.flatten::<2>(1, 3);

        if !self.base_trainable {
            x = x.detach();
        }
        for layer in &self.hidden {
            x = self.activation.forward(layer.forward(x));
        }
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Class probabilities via the configured final activation
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        apply_final_activation(self.forward(images), self.final_activation.0)
    }
}

/// Convert logits to probabilities with the configured final activation
pub fn apply_final_activation<B: Backend>(
    logits: Tensor<B, 2>,
    activation: FinalActivation,
) -> Tensor<B, 2> {
    match activation {
        FinalActivation::Sigmoid => burn::tensor::activation::sigmoid(logits),
        FinalActivation::Softmax => burn::tensor::activation::softmax(logits, 1),
    }
}
