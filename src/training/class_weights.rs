//! Class-weight resolution
//!
//! The `auto` marker computes balanced weights from the class distribution
//! of the validation generator, not the training generator. That mirrors
//! the long-standing behavior of the driver this one replaces; the warning
//! below exists so nobody mistakes it for a deliberate choice.

use tracing::warn;

use crate::config::ClassWeightSpec;
use crate::utils::error::{Result, TrainError};

/// Balanced weights: total / (n_classes * count) per class
fn balanced_weights(counts: &[usize]) -> Vec<f32> {
    let total: usize = counts.iter().sum();
    let n = counts.len().max(1);
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                0.0
            } else {
                total as f32 / (n as f32 * c as f32)
            }
        })
        .collect()
}

/// Resolve the configured class-weight spec into concrete per-class
/// weights. `val_counts` are the validation generator's per-class counts.
pub fn resolve_class_weights(
    spec: &Option<ClassWeightSpec>,
    val_counts: &[usize],
) -> Result<Option<Vec<f32>>> {
    match spec {
        None => Ok(None),
        Some(ClassWeightSpec::Explicit(weights)) => Ok(Some(weights.clone())),
        Some(ClassWeightSpec::Marker(marker)) if marker == "auto" => {
            warn!(
                "class_weights: auto derives weights from the VALIDATION \
                 class distribution, not the training distribution"
            );
            Ok(Some(balanced_weights(val_counts)))
        }
        Some(ClassWeightSpec::Marker(other)) => Err(TrainError::Config(format!(
            "unknown class_weights marker: '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_spec_yields_no_weights() {
        assert_eq!(resolve_class_weights(&None, &[10, 10]).unwrap(), None);
    }

    #[test]
    fn test_explicit_weights_pass_through() {
        let spec = Some(ClassWeightSpec::Explicit(vec![1.0, 4.0]));
        assert_eq!(
            resolve_class_weights(&spec, &[10, 10]).unwrap(),
            Some(vec![1.0, 4.0])
        );
    }

    #[test]
    fn test_auto_weights_balance_validation_counts() {
        let spec = Some(ClassWeightSpec::Marker("auto".to_string()));
        let weights = resolve_class_weights(&spec, &[100, 300]).unwrap().unwrap();
        // total 400, 2 classes: 400/(2*100)=2.0, 400/(2*300)=0.667
        assert!((weights[0] - 2.0).abs() < 1e-6);
        assert!((weights[1] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_auto_weights_with_empty_class() {
        let spec = Some(ClassWeightSpec::Marker("auto".to_string()));
        let weights = resolve_class_weights(&spec, &[50, 0]).unwrap().unwrap();
        assert!(weights[0] > 0.0);
        assert_eq!(weights[1], 0.0);
    }

    #[test]
    fn test_unknown_marker_is_rejected() {
        let spec = Some(ClassWeightSpec::Marker("balanced".to_string()));
        assert!(resolve_class_weights(&spec, &[10, 10]).is_err());
    }
}
