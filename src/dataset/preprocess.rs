//! Pixel preprocessing
//!
//! Raw decoded pixels arrive as f32 in [0, 255]. The pipeline applies, in
//! order: quantile truncation, generator-level z-transform, the named
//! preprocessing function, and samplewise centering. Each stage is
//! independently switchable from the run configuration.

use crate::dataset::augment::PixelBuffer;
use crate::utils::error::{Result, TrainError};

const STD_EPSILON: f32 = 1e-7;

/// Named per-image preprocessing function, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocessing {
    /// Leave pixels as-is
    Identity,
    /// Map [0, 255] to roughly [-1, 1]: x / 128 - 1
    MinusOnePlusOne,
    /// Per-image standardization to zero mean, unit variance
    ZTransform,
}

impl Preprocessing {
    /// Resolve a configured name. Unknown names halt the run before any
    /// pipeline is constructed.
    pub fn from_name(name: Option<&str>) -> Result<Self> {
        match name {
            None => Ok(Preprocessing::Identity),
            Some("m1p1") => Ok(Preprocessing::MinusOnePlusOne),
            Some("ztransform") => Ok(Preprocessing::ZTransform),
            Some(other) => Err(TrainError::UnknownPreprocessing(other.to_string())),
        }
    }

    fn apply(&self, image: &mut PixelBuffer) {
        match self {
            Preprocessing::Identity => {}
            Preprocessing::MinusOnePlusOne => {
                for v in &mut image.data {
                    *v = *v / 128.0 - 1.0;
                }
            }
            Preprocessing::ZTransform => standardize(image),
        }
    }
}

/// Ordered pixel pipeline applied to every image before tensor assembly
#[derive(Debug, Clone)]
pub struct PixelPipeline {
    /// Clamp pixels to the [q, 1-q] quantile band
    pub truncate_quantile: Option<f32>,
    /// Generator-level per-image standardization
    pub ztransform: bool,
    pub preprocessing: Preprocessing,
    /// Subtract the per-image mean as the final stage
    pub samplewise_center: bool,
}

impl PixelPipeline {
    pub fn apply(&self, image: &mut PixelBuffer) {
        if let Some(q) = self.truncate_quantile {
            truncate(image, q);
        }
        if self.ztransform {
            standardize(image);
        }
        self.preprocessing.apply(image);
        if self.samplewise_center {
            let mean = mean(image);
            for v in &mut image.data {
                *v -= mean;
            }
        }
    }
}

fn mean(image: &PixelBuffer) -> f32 {
    image.data.iter().sum::<f32>() / image.data.len() as f32
}

/// Zero-mean, unit-variance standardization of one image
fn standardize(image: &mut PixelBuffer) {
    let m = mean(image);
    let var = image.data.iter().map(|v| (v - m) * (v - m)).sum::<f32>()
        / image.data.len() as f32;
    let std = var.sqrt().max(STD_EPSILON);
    for v in &mut image.data {
        *v = (*v - m) / std;
    }
}

/// Clamp pixels to the empirical [q, 1-q] quantile band
fn truncate(image: &mut PixelBuffer, q: f32) {
    let mut sorted = image.data.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let lo_idx = ((n - 1) as f32 * q).round() as usize;
    let hi_idx = ((n - 1) as f32 * (1.0 - q)).round() as usize;
    let lo = sorted[lo_idx.min(n - 1)];
    let hi = sorted[hi_idx.min(n - 1)];
    for v in &mut image.data {
        *v = v.clamp(lo, hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(values: Vec<f32>) -> PixelBuffer {
        let n = values.len();
        PixelBuffer::new(values, 1, 1, n)
    }

    #[test]
    fn test_selector_resolves_known_names() {
        assert_eq!(Preprocessing::from_name(None).unwrap(), Preprocessing::Identity);
        assert_eq!(
            Preprocessing::from_name(Some("m1p1")).unwrap(),
            Preprocessing::MinusOnePlusOne
        );
        assert_eq!(
            Preprocessing::from_name(Some("ztransform")).unwrap(),
            Preprocessing::ZTransform
        );
    }

    #[test]
    fn test_selector_rejects_unknown_name() {
        let err = Preprocessing::from_name(Some("histeq")).unwrap_err();
        assert!(matches!(err, TrainError::UnknownPreprocessing(ref n) if n == "histeq"));
    }

    #[test]
    fn test_m1p1_maps_pixel_range() {
        let mut image = buffer(vec![0.0, 128.0, 255.0]);
        Preprocessing::MinusOnePlusOne.apply(&mut image);
        assert_eq!(image.data[0], -1.0);
        assert_eq!(image.data[1], 0.0);
        assert!((image.data[2] - 0.9921875).abs() < 1e-6);
    }

    #[test]
    fn test_ztransform_yields_zero_mean_unit_variance() {
        let mut image = buffer(vec![10.0, 20.0, 30.0, 40.0]);
        standardize(&mut image);
        let m = image.data.iter().sum::<f32>() / 4.0;
        let var = image.data.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / 4.0;
        assert!(m.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_constant_image_standardizes_without_nan() {
        let mut image = buffer(vec![5.0; 8]);
        standardize(&mut image);
        assert!(image.data.iter().all(|v| v.is_finite()));
        assert!(image.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_truncation_clamps_tails() {
        let mut image = buffer((0..100).map(|i| i as f32).collect());
        truncate(&mut image, 0.05);
        let max = image.data.iter().cloned().fold(f32::MIN, f32::max);
        let min = image.data.iter().cloned().fold(f32::MAX, f32::min);
        assert!(max < 99.0);
        assert!(min > 0.0);
    }

    #[test]
    fn test_samplewise_center_zeroes_mean() {
        let pipeline = PixelPipeline {
            truncate_quantile: None,
            ztransform: false,
            preprocessing: Preprocessing::Identity,
            samplewise_center: true,
        };
        let mut image = buffer(vec![1.0, 2.0, 3.0, 4.0]);
        pipeline.apply(&mut image);
        let m = image.data.iter().sum::<f32>() / 4.0;
        assert!(m.abs() < 1e-6);
    }

    #[test]
    fn test_pipeline_stage_order() {
        // truncation happens before m1p1, so the clamp bound is in raw
        // pixel space
        let pipeline = PixelPipeline {
            truncate_quantile: Some(0.25),
            ztransform: false,
            preprocessing: Preprocessing::MinusOnePlusOne,
            samplewise_center: false,
        };
        let mut image = buffer(vec![0.0, 64.0, 192.0, 255.0]);
        pipeline.apply(&mut image);
        // all values passed through x/128-1 after clamping
        assert!(image.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
