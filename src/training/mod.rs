//! Training: learning-rate policies, callbacks, class-weight resolution,
//! and the epoch-loop driver.

pub mod callbacks;
pub mod class_weights;
pub mod driver;
pub mod schedule;

pub use callbacks::{build_callbacks, Callback, CallbackActions, EpochRecord};
pub use class_weights::resolve_class_weights;
pub use driver::{steps_per_epoch, train, validation_steps_raw, TrainOutcome};
pub use schedule::{CyclicSchedule, PlateauReducer};
