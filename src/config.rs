//! Run Configuration
//!
//! A training run is described by a single `RunConfig` record with named,
//! typed fields. Its identity is a SHA-256 hash of its serialized string
//! form; the hash names the run directory under the checkpoint root.
//!
//! Two derived fields (the square target size and the loss name) are
//! appended to the persisted `checkpoint.info` document only after the hash
//! has been taken, so they never participate in run identity.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::dataset::augment::FillMode;
use crate::utils::error::{Result, TrainError};

/// Name of the serialized configuration document inside a run directory
pub const INFO_FILE: &str = "checkpoint.info";

/// Name of the per-epoch progress log inside a run directory
pub const PROGRESS_LOG_FILE: &str = "progresslog.csv";

/// Classification mode of the label stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassMode {
    /// Single-logit output, targets in {0, 1}
    Binary,
    /// One logit per class, integer class-index targets
    Categorical,
}

impl ClassMode {
    /// Loss-function name interpolated from the classification mode
    pub fn loss_name(&self) -> String {
        let mode = match self {
            ClassMode::Binary => "binary",
            ClassMode::Categorical => "categorical",
        };
        format!("{}_crossentropy", mode)
    }
}

/// Final activation applied when converting logits to probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalActivation {
    Sigmoid,
    Softmax,
}

/// Rounding policy for the fractional validation step count.
///
/// The source of this driver computed validation steps as a raw quotient and
/// relied on the framework to coerce it; the intended rounding is ambiguous,
/// so it is exposed as an explicit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStepsPolicy {
    Floor,
    #[default]
    Ceil,
}

impl ValidationStepsPolicy {
    /// Resolve a raw fractional step count to an integer loop bound
    pub fn resolve(&self, raw: f64) -> usize {
        let resolved = match self {
            ValidationStepsPolicy::Floor => raw.floor(),
            ValidationStepsPolicy::Ceil => raw.ceil(),
        };
        resolved.max(0.0) as usize
    }
}

/// Reduce-on-plateau learning-rate policy block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Metric to monitor (only `val_loss` is produced by this driver)
    pub monitor: String,
    /// Multiplicative shrink factor applied on plateau
    pub factor: f64,
    /// Epochs without improvement before reducing
    pub patience: usize,
    /// Epochs to wait after a reduction before counting again
    pub cooldown: usize,
    /// Floor value for the learning rate
    pub min_lr: f64,
    /// Minimum change that counts as an improvement
    pub epsilon: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            monitor: "val_loss".to_string(),
            factor: 0.5,
            patience: 32,
            cooldown: 32,
            min_lr: 1e-8,
            epsilon: 1e-3,
        }
    }
}

/// Cyclic step-decay learning-rate schedule block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicConfig {
    /// Multiplicative drop applied every `epochs_drop` epochs
    pub drop: f64,
    /// Epochs between drops
    pub epochs_drop: usize,
    /// Cycle length in epochs; the schedule restarts at each cycle boundary
    pub cycle_len: usize,
}

/// Per-class weight specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassWeightSpec {
    /// String marker; the literal `auto` requests weights computed from the
    /// validation generator's class distribution
    Marker(String),
    /// Explicit per-class weights, index-aligned with the class list
    Explicit(Vec<f32>),
}

impl ClassWeightSpec {
    pub fn is_auto(&self) -> bool {
        matches!(self, ClassWeightSpec::Marker(m) if m == "auto")
    }
}

/// Immutable (post-hash) record of every hyperparameter of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub dropout: f64,
    pub base_trainable: bool,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub zoom_range: [f32; 2],
    pub rotation_range: f32,
    pub fill_mode: FillMode,
    pub ndense: usize,
    pub batch_size: usize,
    pub init_epoch: usize,
    pub nb_epoch: usize,
    pub data_augmentation: bool,
    pub contrast: Option<f32>,
    pub truncate_quantile: Option<f32>,
    pub ztransform: bool,
    pub oversampling: bool,
    pub sampling_factor: Option<Vec<f32>>,
    pub seed: u64,
    pub width_shift_range: f32,
    pub height_shift_range: f32,
    pub class_mode: ClassMode,
    pub n_classes: usize,
    pub final_activation: FinalActivation,
    pub lr: f64,
    pub samplewise_center: bool,
    pub target_side: u32,
    /// Weights file loaded after construction, overriding pretrained init
    pub weightfile: Option<PathBuf>,
    /// Pretrained-weight source for the base extractor; None = random init
    pub pretrained: Option<PathBuf>,
    pub data_train: PathBuf,
    pub data_val: PathBuf,
    /// Explicit class-name list; fixes label-index assignment
    pub classes: Vec<String>,
    pub class_weights: Option<ClassWeightSpec>,
    /// Preprocessing function selected by name; None = identity
    pub preprocessing_function: Option<String>,
    pub reduce_lr_on_plateau: Option<PlateauConfig>,
    pub lr_cyclic_schedule: Option<CyclicConfig>,
    pub validation_steps_policy: ValidationStepsPolicy,
    /// GPU device visibility, applied before any backend object exists
    pub cuda_visible_devices: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dropout: 0.5,
            base_trainable: true,
            horizontal_flip: true,
            vertical_flip: false,
            zoom_range: [0.8, 1.2],
            rotation_range: 15.0,
            fill_mode: FillMode::Reflect,
            ndense: 0,
            batch_size: 256,
            init_epoch: 0,
            nb_epoch: 500,
            data_augmentation: true,
            contrast: None,
            truncate_quantile: None,
            ztransform: false,
            oversampling: false,
            sampling_factor: None,
            seed: 2,
            width_shift_range: 0.125,
            height_shift_range: 0.125,
            class_mode: ClassMode::Binary,
            n_classes: 1,
            final_activation: FinalActivation::Sigmoid,
            lr: 1e-4,
            samplewise_center: false,
            target_side: 99,
            weightfile: None,
            pretrained: None,
            data_train: PathBuf::from("data/train"),
            data_val: PathBuf::from("data/val"),
            classes: vec!["normal".to_string(), "special".to_string()],
            class_weights: None,
            preprocessing_function: None,
            reduce_lr_on_plateau: Some(PlateauConfig::default()),
            lr_cyclic_schedule: None,
            validation_steps_policy: ValidationStepsPolicy::default(),
            cuda_visible_devices: None,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a YAML document
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Square target size derived from the single side length
    pub fn target_size(&self) -> (u32, u32) {
        (self.target_side, self.target_side)
    }

    /// Loss-function name derived from the classification mode
    pub fn loss_name(&self) -> String {
        self.class_mode.loss_name()
    }

    /// Content hash of the configuration's string form.
    ///
    /// Taken before `target_size` and `loss` are appended to the persisted
    /// document, matching the original run-identity behavior. No collision
    /// handling exists across distinct configurations.
    pub fn run_hash(&self) -> Result<String> {
        let serialized = serde_yaml::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Sanity-check the configuration before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(TrainError::Config("classes list is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch_size must be > 0".to_string()));
        }
        if self.target_side == 0 {
            return Err(TrainError::Config("target_side must be >= 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainError::Config(
                "dropout must be in [0.0, 1.0)".to_string(),
            ));
        }
        if self.zoom_range[0] <= 0.0 || self.zoom_range[0] > self.zoom_range[1] {
            return Err(TrainError::Config(
                "zoom_range must be ordered and positive".to_string(),
            ));
        }
        if self.init_epoch >= self.nb_epoch {
            return Err(TrainError::Config(
                "init_epoch must be below nb_epoch".to_string(),
            ));
        }
        if let Some(factors) = &self.sampling_factor {
            if factors.len() != self.classes.len() {
                return Err(TrainError::Config(
                    "sampling_factor length must match the class list".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Filesystem location of a single run, named by the configuration hash
#[derive(Debug, Clone)]
pub struct RunDirectory {
    pub hash: String,
    pub path: PathBuf,
}

impl RunDirectory {
    /// Create (idempotently) the run directory and persist provenance:
    /// a copy of the running executable and the configuration document.
    pub fn create(root: &Path, config: &RunConfig) -> Result<Self> {
        let hash = config.run_hash()?;
        let path = root.join(&hash);
        fs::create_dir_all(&path)?;

        copy_executable(&path);
        write_info(&path, config)?;

        Ok(Self { hash, path })
    }

    /// Path of the serialized configuration document
    pub fn info_path(&self) -> PathBuf {
        self.path.join(INFO_FILE)
    }

    /// Path of the per-epoch CSV progress log
    pub fn progress_log_path(&self) -> PathBuf {
        self.path.join(PROGRESS_LOG_FILE)
    }

    /// Weights-file path for one epoch, encoding epoch index and
    /// validation loss in the name
    pub fn checkpoint_path(&self, epoch: usize, val_loss: f64) -> PathBuf {
        self.path.join(format!("model.{:02}-{:.6}", epoch, val_loss))
    }
}

/// Copy the running executable into the run directory. The original driver
/// copied its own script for provenance; failure here is non-fatal.
fn copy_executable(run_dir: &Path) {
    match std::env::current_exe() {
        Ok(exe) => {
            let name = exe
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "driver".into());
            if let Err(e) = fs::copy(&exe, run_dir.join(name)) {
                debug!("provenance copy failed: {}", e);
            }
        }
        Err(e) => debug!("current_exe unavailable: {}", e),
    }
}

/// Serialize the configuration, appending the two derived keys
/// (`target_size`, `loss`) that the hash does not cover.
fn write_info(run_dir: &Path, config: &RunConfig) -> Result<()> {
    let mut doc = serde_yaml::to_value(config)?;
    if let serde_yaml::Value::Mapping(map) = &mut doc {
        let side = config.target_side as u64;
        map.insert(
            serde_yaml::Value::from("target_size"),
            serde_yaml::Value::Sequence(vec![
                serde_yaml::Value::from(side),
                serde_yaml::Value::from(side),
            ]),
        );
        map.insert(
            serde_yaml::Value::from("loss"),
            serde_yaml::Value::from(config.loss_name()),
        );
    }
    let text = serde_yaml::to_string(&doc)?;
    fs::write(run_dir.join(INFO_FILE), text)?;
    Ok(())
}
