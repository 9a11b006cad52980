//! Epoch-boundary callbacks
//!
//! Every run carries a checkpoint saver and a wall-clock CSV logger. At
//! most one learning-rate policy joins them: the plateau reducer when
//! configured, otherwise the cyclic schedule when configured. Callbacks
//! request state changes through `CallbackActions`; the driver applies
//! them after all callbacks have run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use chrono::Local;
use tracing::info;

use crate::config::{RunConfig, RunDirectory};
use crate::model::{self, ImageClassifier};
use crate::training::schedule::{CyclicSchedule, PlateauReducer};
use crate::utils::error::Result;

/// Metrics of one completed epoch
#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub epoch: usize,
    pub elapsed_secs: f64,
    pub lr: f64,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// State changes requested by callbacks, applied by the driver
#[derive(Debug, Default)]
pub struct CallbackActions {
    /// Learning rate to use from the next epoch on
    pub new_lr: Option<f64>,
}

pub trait Callback<B: AutodiffBackend> {
    fn name(&self) -> &'static str;

    /// Whether this callback drives the learning rate
    fn is_lr_policy(&self) -> bool {
        false
    }

    fn on_train_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        model: &ImageClassifier<B>,
        record: &EpochRecord,
        actions: &mut CallbackActions,
    ) -> Result<()>;
}

/// Saves the full parameter set after every epoch, encoding the epoch
/// index and validation loss into the file name
pub struct CheckpointSaver {
    run_dir: RunDirectory,
}

impl CheckpointSaver {
    pub fn new(run_dir: RunDirectory) -> Self {
        Self { run_dir }
    }
}

impl<B: AutodiffBackend> Callback<B> for CheckpointSaver {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn on_epoch_end(
        &mut self,
        model: &ImageClassifier<B>,
        record: &EpochRecord,
        _actions: &mut CallbackActions,
    ) -> Result<()> {
        let path = self.run_dir.checkpoint_path(record.epoch, record.val_loss);
        model::save_weights(model, &path)?;
        info!("checkpoint written: {:?}", path);
        Ok(())
    }
}

const CSV_HEADER: &str = "wallclock,epoch,elapsed,lr,loss,accuracy,val_loss,val_accuracy";

/// Appends one CSV row per epoch, stamped with local wall-clock time.
/// A fresh run truncates any previous log; a resumed run appends.
pub struct CsvWallClockLogger {
    path: PathBuf,
    append: bool,
}

impl CsvWallClockLogger {
    pub fn new(path: PathBuf, append: bool) -> Self {
        Self { path, append }
    }
}

impl<B: AutodiffBackend> Callback<B> for CsvWallClockLogger {
    fn name(&self) -> &'static str {
        "csv_logger"
    }

    fn on_train_begin(&mut self) -> Result<()> {
        if self.append && self.path.exists() {
            return Ok(());
        }
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", CSV_HEADER)?;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _model: &ImageClassifier<B>,
        record: &EpochRecord,
        _actions: &mut CallbackActions,
    ) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{},{},{:.3},{:e},{:.6},{:.6},{:.6},{:.6}",
            Local::now().to_rfc3339(),
            record.epoch,
            record.elapsed_secs,
            record.lr,
            record.loss,
            record.accuracy,
            record.val_loss,
            record.val_accuracy,
        )?;
        Ok(())
    }
}

/// Learning-rate policy: reduce on validation-loss plateau
pub struct PlateauCallback {
    reducer: PlateauReducer,
}

impl PlateauCallback {
    pub fn new(reducer: PlateauReducer) -> Self {
        Self { reducer }
    }
}

impl<B: AutodiffBackend> Callback<B> for PlateauCallback {
    fn name(&self) -> &'static str {
        "reduce_lr_on_plateau"
    }

    fn is_lr_policy(&self) -> bool {
        true
    }

    fn on_epoch_end(
        &mut self,
        _model: &ImageClassifier<B>,
        record: &EpochRecord,
        actions: &mut CallbackActions,
    ) -> Result<()> {
        if let Some(new_lr) = self.reducer.observe(record.val_loss, record.lr) {
            actions.new_lr = Some(new_lr);
        }
        Ok(())
    }
}

/// Learning-rate policy: cyclic step decay, indexed by epoch
pub struct CyclicCallback {
    schedule: CyclicSchedule,
}

impl CyclicCallback {
    pub fn new(schedule: CyclicSchedule) -> Self {
        Self { schedule }
    }
}

impl<B: AutodiffBackend> Callback<B> for CyclicCallback {
    fn name(&self) -> &'static str {
        "lr_cyclic_schedule"
    }

    fn is_lr_policy(&self) -> bool {
        true
    }

    fn on_epoch_end(
        &mut self,
        _model: &ImageClassifier<B>,
        record: &EpochRecord,
        actions: &mut CallbackActions,
    ) -> Result<()> {
        actions.new_lr = Some(self.schedule.lr_for_epoch(record.epoch + 1));
        Ok(())
    }
}

/// Assemble the callback list for a run. The plateau reducer takes
/// precedence when both learning-rate blocks are configured.
pub fn build_callbacks<B: AutodiffBackend>(
    config: &RunConfig,
    run_dir: &RunDirectory,
    append_log: bool,
) -> Vec<Box<dyn Callback<B>>> {
    let mut callbacks: Vec<Box<dyn Callback<B>>> = vec![
        Box::new(CheckpointSaver::new(run_dir.clone())),
        Box::new(CsvWallClockLogger::new(
            run_dir.progress_log_path(),
            append_log,
        )),
    ];

    if let Some(plateau) = &config.reduce_lr_on_plateau {
        callbacks.push(Box::new(PlateauCallback::new(PlateauReducer::new(
            plateau.clone(),
        ))));
    } else if let Some(cyclic) = &config.lr_cyclic_schedule {
        callbacks.push(Box::new(CyclicCallback::new(CyclicSchedule::new(
            cyclic.clone(),
            config.lr,
        ))));
    }

    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CyclicConfig, PlateauConfig};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn record(epoch: usize, val_loss: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            elapsed_secs: 1.0,
            lr: 1e-4,
            loss: 0.5,
            accuracy: 0.8,
            val_loss,
            val_accuracy: 0.75,
        }
    }

    fn lr_policy_names<B: AutodiffBackend>(callbacks: &[Box<dyn Callback<B>>]) -> Vec<&str> {
        callbacks
            .iter()
            .filter(|c| c.is_lr_policy())
            .map(|c| c.name())
            .collect()
    }

    #[test]
    fn test_plateau_takes_precedence_over_cyclic() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RunConfig {
            reduce_lr_on_plateau: Some(PlateauConfig::default()),
            lr_cyclic_schedule: Some(CyclicConfig {
                drop: 0.5,
                epochs_drop: 10,
                cycle_len: 100,
            }),
            ..RunConfig::default()
        };
        let run_dir = RunDirectory::create(tmp.path(), &config).unwrap();

        let callbacks = build_callbacks::<TestBackend>(&config, &run_dir, false);
        assert_eq!(
            lr_policy_names(&callbacks),
            vec!["reduce_lr_on_plateau"]
        );
    }

    #[test]
    fn test_cyclic_used_when_plateau_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RunConfig {
            reduce_lr_on_plateau: None,
            lr_cyclic_schedule: Some(CyclicConfig {
                drop: 0.5,
                epochs_drop: 10,
                cycle_len: 100,
            }),
            ..RunConfig::default()
        };
        let run_dir = RunDirectory::create(tmp.path(), &config).unwrap();

        let callbacks = build_callbacks::<TestBackend>(&config, &run_dir, false);
        assert_eq!(lr_policy_names(&callbacks), vec!["lr_cyclic_schedule"]);
    }

    #[test]
    fn test_no_lr_policy_when_neither_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RunConfig {
            reduce_lr_on_plateau: None,
            lr_cyclic_schedule: None,
            ..RunConfig::default()
        };
        let run_dir = RunDirectory::create(tmp.path(), &config).unwrap();

        let callbacks = build_callbacks::<TestBackend>(&config, &run_dir, false);
        assert!(lr_policy_names(&callbacks).is_empty());
        // saver and logger are always present
        assert_eq!(callbacks.len(), 2);
    }

    #[test]
    fn test_csv_logger_truncates_on_fresh_run() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("progresslog.csv");
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut logger = CsvWallClockLogger::new(path.clone(), false);
        Callback::<TestBackend>::on_train_begin(&mut logger).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), CSV_HEADER);
    }

    #[test]
    fn test_csv_logger_appends_on_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("progresslog.csv");
        std::fs::write(&path, format!("{}\nold-row\n", CSV_HEADER)).unwrap();

        let mut logger = CsvWallClockLogger::new(path.clone(), true);
        Callback::<TestBackend>::on_train_begin(&mut logger).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("old-row"));
    }

    #[test]
    fn test_csv_logger_writes_epoch_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("progresslog.csv");

        let device = Default::default();
        let model = crate::model::ImageClassifierConfig::new(1).init::<TestBackend>(&device);

        let mut logger = CsvWallClockLogger::new(path.clone(), false);
        Callback::<TestBackend>::on_train_begin(&mut logger).unwrap();
        let mut actions = CallbackActions::default();
        logger
            .on_epoch_end(&model, &record(3, 0.25), &mut actions)
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.trim().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(",3,"));
        assert!(lines[1].contains("0.250000"));
    }

    #[test]
    fn test_plateau_callback_requests_lr_change() {
        let mut callback = PlateauCallback::new(PlateauReducer::new(PlateauConfig {
            patience: 1,
            cooldown: 0,
            ..PlateauConfig::default()
        }));
        let device = Default::default();
        let model = crate::model::ImageClassifierConfig::new(1).init::<TestBackend>(&device);

        let mut actions = CallbackActions::default();
        callback
            .on_epoch_end(&model, &record(0, 1.0), &mut actions)
            .unwrap();
        assert!(actions.new_lr.is_none());

        let mut actions = CallbackActions::default();
        callback
            .on_epoch_end(&model, &record(1, 1.0), &mut actions)
            .unwrap();
        assert_eq!(actions.new_lr, Some(5e-5));
    }

    #[test]
    fn test_checkpoint_saver_writes_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RunConfig::default();
        let run_dir = RunDirectory::create(tmp.path(), &config).unwrap();

        let device = Default::default();
        let model = crate::model::ImageClassifierConfig::new(1).init::<TestBackend>(&device);

        let mut saver = CheckpointSaver::new(run_dir.clone());
        let mut actions = CallbackActions::default();
        saver
            .on_epoch_end(&model, &record(7, 0.123456), &mut actions)
            .unwrap();

        let expected = run_dir.checkpoint_path(7, 0.123456).with_extension("mpk");
        assert!(expected.exists());
    }
}
