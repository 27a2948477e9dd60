use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Dataset, RawPoint, Sample},
    error::{EngineError, Result},
};

/// Standard deviations at or below this are treated as a constant feature.
pub const MIN_STD: f64 = 1e-12;

/// Mean and population standard deviation of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation, never zero.
    pub std: f64,
}

impl FeatureStats {
    /// Stats that leave values unchanged.
    pub const IDENTITY: Self = Self { mean: 0.0, std: 1.0 };

    #[allow(clippy::cast_precision_loss)]
    fn fit(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        Self {
            mean,
            std: if std > MIN_STD { std } else { 1.0 },
        }
    }

    /// `(value - mean) / std`.
    #[must_use]
    pub fn standardize(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    /// Inverse of [`FeatureStats::standardize`].
    #[must_use]
    pub fn restore(&self, value: f64) -> f64 {
        value.mul_add(self.std, self.mean)
    }
}

/// A point in standardized feature space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardizedPoint {
    /// Standardized study hours.
    pub study_hours: f64,
    /// Standardized attendance.
    pub attendance: f64,
}

/// A sample whose features were standardized; the label is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardizedSample {
    /// Standardized features.
    pub features: StandardizedPoint,
    /// Whether the student passed.
    pub passed: bool,
}

impl StandardizedSample {
    /// Label as `0.0` / `1.0`.
    #[must_use]
    pub fn label(&self) -> f64 {
        f64::from(u8::from(self.passed))
    }
}

/// Per-feature statistics derived once from the raw dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    /// Study hours statistics.
    pub study_hours: FeatureStats,
    /// Attendance statistics.
    pub attendance: FeatureStats,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            study_hours: FeatureStats::IDENTITY,
            attendance: FeatureStats::IDENTITY,
        }
    }
}

impl NormalizationParams {
    /// Maps a raw point into standardized space.
    #[must_use]
    pub fn to_standardized(&self, point: RawPoint) -> StandardizedPoint {
        StandardizedPoint {
            study_hours: self.study_hours.standardize(point.study_hours),
            attendance: self.attendance.standardize(point.attendance),
        }
    }

    /// Maps a standardized point back into raw space.
    #[must_use]
    pub fn to_raw(&self, point: StandardizedPoint) -> RawPoint {
        RawPoint::new(
            self.study_hours.restore(point.study_hours),
            self.attendance.restore(point.attendance),
        )
    }

    /// Standardizes every sample, preserving order and labels.
    #[must_use]
    pub fn standardize(&self, samples: &[Sample]) -> Vec<StandardizedSample> {
        samples
            .iter()
            .map(|sample| StandardizedSample {
                features: self.to_standardized(sample.features()),
                passed: sample.passed,
            })
            .collect()
    }
}

/// Fits normalization parameters from raw data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    /// Mean and population std per feature.
    ///
    /// # Errors
    ///
    /// [`EngineError::EmptyDataset`] when there is nothing to fit.
    pub fn fit(dataset: &Dataset) -> Result<NormalizationParams> {
        if dataset.is_empty() {
            return Err(EngineError::EmptyDataset);
        }
        let (hours, attendance): (Vec<f64>, Vec<f64>) = dataset
            .samples
            .iter()
            .map(|sample| (sample.study_hours, sample.attendance))
            .unzip();
        Ok(NormalizationParams {
            study_hours: FeatureStats::fit(&hours),
            attendance: FeatureStats::fit(&attendance),
        })
    }

    /// Convenience wrapper over [`NormalizationParams::standardize`].
    #[must_use]
    pub fn standardize(dataset: &Dataset, params: &NormalizationParams) -> Vec<StandardizedSample> {
        params.standardize(&dataset.samples)
    }
}
