//! Training driver
//!
//! Owns the epoch loop: streams batches from the training generator,
//! steps the optimizer, evaluates on the validation generator, and runs
//! the callback chain at each epoch boundary. The loop is bounded by
//! explicit step counts since the generators never exhaust.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use colored::Colorize;
use tracing::info;

use crate::config::{ClassMode, FinalActivation, RunConfig, RunDirectory};
use crate::dataset::{
    Augmenter, DirectoryGenerator, GeneratorOptions, PixelPipeline, Preprocessing,
};
use crate::model::{self, apply_final_activation, ImageClassifier};
use crate::training::callbacks::{build_callbacks, CallbackActions, EpochRecord};
use crate::training::class_weights::resolve_class_weights;
use crate::training::schedule::CyclicSchedule;
use crate::utils::error::{Result, TrainError};

/// Whole training batches per epoch; the trailing partial batch is dropped
pub fn steps_per_epoch(num_samples: usize, batch_size: usize) -> usize {
    num_samples / batch_size
}

/// Raw fractional validation step count, resolved by the configured policy
pub fn validation_steps_raw(num_samples: usize, batch_size: usize) -> f64 {
    num_samples as f64 / batch_size as f64
}

/// Result of a completed run
#[derive(Debug)]
pub struct TrainOutcome {
    pub run_dir: PathBuf,
    pub epochs_run: usize,
    pub final_val_loss: f64,
    pub final_val_accuracy: f64,
}

/// Loss and correct-prediction count for one batch of logits
fn batch_metrics<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    class_mode: ClassMode,
    weights: &Option<Vec<f32>>,
    final_activation: FinalActivation,
    device: &B::Device,
) -> (Tensor<B, 1>, usize) {
    match class_mode {
        ClassMode::Binary => {
            let loss = BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .with_weights(weights.clone())
                .init(device)
                .forward(logits.clone().squeeze::<1>(1), targets.clone());

            let predictions = apply_final_activation(logits, final_activation)
                .squeeze::<1>(1)
                .greater_elem(0.5)
                .int();
            let correct = predictions
                .equal(targets)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>() as usize;
            (loss, correct)
        }
        ClassMode::Categorical => {
            let loss = CrossEntropyLossConfig::new()
                .with_weights(weights.clone())
                .init(device)
                .forward(logits.clone(), targets.clone());

            let predictions = apply_final_activation(logits, final_activation)
                .argmax(1)
                .squeeze::<1>(1);
            let correct = predictions
                .equal(targets)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>() as usize;
            (loss, correct)
        }
    }
}

/// Run the validation model over `steps` batches; returns (loss, accuracy)
fn evaluate<B: AutodiffBackend>(
    model: &ImageClassifier<B>,
    generator: &mut DirectoryGenerator,
    steps: usize,
    class_mode: ClassMode,
    weights: &Option<Vec<f32>>,
    final_activation: FinalActivation,
    device: &B::Device,
) -> Result<(f64, f64)> {
    let model = model.valid();
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for _ in 0..steps {
        let batch = generator.next_batch::<B::InnerBackend>(device)?;
        let batch_size = batch.images.dims()[0];
        let logits = model.forward(batch.images);
        let (loss, batch_correct) =
            batch_metrics(logits, batch.targets, class_mode, weights, final_activation, device);
        loss_sum += loss.into_scalar().elem::<f64>();
        correct += batch_correct;
        seen += batch_size;
    }

    if steps == 0 || seen == 0 {
        return Ok((0.0, 0.0));
    }
    Ok((loss_sum / steps as f64, correct as f64 / seen as f64))
}

fn generator_options(
    config: &RunConfig,
    pipeline: PixelPipeline,
    training: bool,
) -> GeneratorOptions {
    let augment = if training && config.data_augmentation {
        Some(Augmenter {
            horizontal_flip: config.horizontal_flip,
            vertical_flip: config.vertical_flip,
            rotation_range: config.rotation_range,
            zoom_range: config.zoom_range,
            width_shift_range: config.width_shift_range,
            height_shift_range: config.height_shift_range,
            contrast: config.contrast,
            fill_mode: config.fill_mode,
        })
    } else {
        None
    };

    GeneratorOptions {
        batch_size: config.batch_size,
        target_size: config.target_size(),
        shuffle: training,
        augment,
        pipeline,
        oversampling: training && config.oversampling,
        sampling_factor: if training {
            config.sampling_factor.clone()
        } else {
            None
        },
        seed: config.seed,
    }
}

/// Starting learning rate for the first trained epoch. A resumed run under
/// the cyclic schedule picks up at the scheduled rate for `init_epoch`;
/// the plateau policy (which takes precedence) starts from the configured
/// rate and only moves it on observed plateaus.
fn initial_lr(config: &RunConfig) -> f64 {
    if config.reduce_lr_on_plateau.is_none() {
        if let Some(cyclic) = &config.lr_cyclic_schedule {
            return CyclicSchedule::new(cyclic.clone(), config.lr)
                .lr_for_epoch(config.init_epoch);
        }
    }
    config.lr
}

/// Train per the configuration, writing all run artifacts under
/// `checkpoint_root/<config hash>/`.
pub fn train<B: AutodiffBackend>(
    config: &RunConfig,
    checkpoint_root: &Path,
    device: &B::Device,
) -> Result<TrainOutcome> {
    config.validate()?;

    // resolve the preprocessing name before any filesystem work
    let preprocessing = Preprocessing::from_name(config.preprocessing_function.as_deref())?;
    let pipeline = PixelPipeline {
        truncate_quantile: config.truncate_quantile,
        ztransform: config.ztransform,
        preprocessing,
        samplewise_center: config.samplewise_center,
    };

    let run_dir = RunDirectory::create(checkpoint_root, config)?;
    println!("{} {}", "run:".bold(), run_dir.hash.cyan());
    println!(
        "{} {}, augmentation {}",
        "loss:".bold(),
        config.loss_name(),
        if config.data_augmentation { "on" } else { "off" },
    );
    info!("run directory: {:?}", run_dir.path);

    let mut train_gen = DirectoryGenerator::from_directory(
        &config.data_train,
        &config.classes,
        generator_options(config, pipeline.clone(), true),
    )?;
    let mut val_gen = DirectoryGenerator::from_directory(
        &config.data_val,
        &config.classes,
        generator_options(config, pipeline.clone(), false),
    )?;

    let class_weights = resolve_class_weights(&config.class_weights, &val_gen.class_counts())?;
    if let Some(weights) = &class_weights {
        info!("class weights: {:?}", weights);
    }

    let steps = steps_per_epoch(train_gen.num_samples(), config.batch_size);
    if steps == 0 {
        return Err(TrainError::Config(format!(
            "training set has {} samples, fewer than one batch of {}",
            train_gen.num_samples(),
            config.batch_size
        )));
    }
    let val_raw = validation_steps_raw(val_gen.num_samples(), config.batch_size);
    let val_steps = config.validation_steps_policy.resolve(val_raw);
    println!(
        "{} {} train / {} val samples, {} steps, validation_steps {:.6} -> {}",
        "data:".bold(),
        train_gen.num_samples(),
        val_gen.num_samples(),
        steps,
        val_raw,
        val_steps,
    );

    let mut model = model::build_model::<B>(config, device)?;
    let mut optimizer = AdamConfig::new().init::<B, ImageClassifier<B>>();
    let resume = config.init_epoch > 0;
    let mut callbacks = build_callbacks::<B>(config, &run_dir, resume);
    for callback in &mut callbacks {
        callback.on_train_begin()?;
    }

    let mut current_lr = initial_lr(config);

    for epoch in config.init_epoch..config.nb_epoch {
        let started = Instant::now();
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for _ in 0..steps {
            let batch = train_gen.next_batch::<B>(device)?;
            let batch_size = batch.images.dims()[0];
            let logits = model.forward(batch.images);
            let (loss, batch_correct) = batch_metrics(
                logits,
                batch.targets,
                config.class_mode,
                &class_weights,
                config.final_activation,
                device,
            );

            loss_sum += loss.clone().into_scalar().elem::<f64>();
            correct += batch_correct;
            seen += batch_size;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(current_lr, model, grads);
        }

        let (val_loss, val_accuracy) = evaluate(
            &model,
            &mut val_gen,
            val_steps,
            config.class_mode,
            &class_weights,
            config.final_activation,
            device,
        )?;

        let record = EpochRecord {
            epoch,
            elapsed_secs: started.elapsed().as_secs_f64(),
            lr: current_lr,
            loss: loss_sum / steps as f64,
            accuracy: correct as f64 / seen.max(1) as f64,
            val_loss,
            val_accuracy,
        };
        println!(
            "{} {}/{}  loss {:.4}  acc {:.4}  val_loss {:.4}  val_acc {:.4}  lr {:e}  ({:.1}s)",
            "epoch".green().bold(),
            epoch + 1,
            config.nb_epoch,
            record.loss,
            record.accuracy,
            record.val_loss,
            record.val_accuracy,
            record.lr,
            record.elapsed_secs,
        );

        let mut actions = CallbackActions::default();
        for callback in &mut callbacks {
            callback.on_epoch_end(&model, &record, &mut actions)?;
        }
        if let Some(new_lr) = actions.new_lr {
            current_lr = new_lr;
        }
    }

    // final evaluation on a fresh, unshuffled validation stream
    let mut final_gen = DirectoryGenerator::from_directory(
        &config.data_val,
        &config.classes,
        generator_options(config, pipeline, false),
    )?;
    let (final_val_loss, final_val_accuracy) = evaluate(
        &model,
        &mut final_gen,
        val_steps,
        config.class_mode,
        &class_weights,
        config.final_activation,
        device,
    )?;
    println!(
        "{} val_loss {:.6}  val_acc {:.6}",
        "final:".yellow().bold(),
        final_val_loss,
        final_val_accuracy,
    );

    Ok(TrainOutcome {
        run_dir: run_dir.path,
        epochs_run: config.nb_epoch - config.init_epoch,
        final_val_loss,
        final_val_accuracy,
    })
}
