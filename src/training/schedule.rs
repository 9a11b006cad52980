//! Learning-rate policies
//!
//! Exactly one policy drives the learning rate during a run: either the
//! plateau reducer or the cyclic step-decay schedule. Selection happens in
//! callback assembly; this module holds the pure policy state machines.

use tracing::info;

use crate::config::{CyclicConfig, PlateauConfig};

/// Reduce-on-plateau state machine over the monitored validation loss.
///
/// After a reduction, a cooldown window suppresses the patience counter so
/// consecutive reductions are at least `cooldown` epochs apart.
#[derive(Debug)]
pub struct PlateauReducer {
    config: PlateauConfig,
    best: f64,
    wait: usize,
    cooldown_counter: usize,
}

impl PlateauReducer {
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
            cooldown_counter: 0,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }

    /// Feed one epoch's monitored value; returns the reduced learning rate
    /// when a reduction fires.
    pub fn observe(&mut self, monitored: f64, current_lr: f64) -> Option<f64> {
        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if monitored < self.best - self.config.epsilon {
            self.best = monitored;
            self.wait = 0;
            return None;
        }

        if self.in_cooldown() {
            return None;
        }

        self.wait += 1;
        if self.wait >= self.config.patience && current_lr > self.config.min_lr {
            self.wait = 0;
            self.cooldown_counter = self.config.cooldown;
            let new_lr = (current_lr * self.config.factor).max(self.config.min_lr);
            info!(
                "{} plateaued; reducing lr {} -> {}",
                self.config.monitor, current_lr, new_lr
            );
            return Some(new_lr);
        }
        None
    }
}

/// Cyclic step decay: within each cycle of `cycle_len` epochs the rate
/// drops by `drop` every `epochs_drop` epochs, then resets.
#[derive(Debug, Clone)]
pub struct CyclicSchedule {
    config: CyclicConfig,
    lr_init: f64,
}

impl CyclicSchedule {
    pub fn new(config: CyclicConfig, lr_init: f64) -> Self {
        Self { config, lr_init }
    }

    pub fn lr_for_epoch(&self, epoch: usize) -> f64 {
        let position = epoch % self.config.cycle_len.max(1);
        let drops = (position / self.config.epochs_drop.max(1)) as i32;
        self.lr_init * self.config.drop.powi(drops)
    }
}
