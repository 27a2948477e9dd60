use std::fmt;

use ndarray::{aview1, Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::normalizer::{StandardizedPoint, StandardizedSample};

/// Fixed gradient-descent step size.
pub const LEARNING_RATE: f64 = 0.3;
/// Initial weights are drawn uniformly from `[-INIT_RANGE, INIT_RANGE]`.
pub const INIT_RANGE: f64 = 0.1;
/// Hypothesis values are clamped to `[EPS, 1 - EPS]` before taking logs.
pub const PROBABILITY_EPSILON: f64 = 1e-15;

/// `[bias, w_study_hours, w_attendance]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector([f64; 3]);

impl WeightVector {
    /// Builds a weight vector from its components.
    #[must_use]
    pub const fn new(bias: f64, study_hours: f64, attendance: f64) -> Self {
        Self([bias, study_hours, attendance])
    }

    /// Draws each component uniformly from `[-INIT_RANGE, INIT_RANGE]`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self([
            rng.gen_range(-INIT_RANGE..=INIT_RANGE),
            rng.gen_range(-INIT_RANGE..=INIT_RANGE),
            rng.gen_range(-INIT_RANGE..=INIT_RANGE),
        ])
    }

    /// Intercept.
    #[must_use]
    pub const fn bias(&self) -> f64 {
        self.0[0]
    }

    /// Study hours coefficient.
    #[must_use]
    pub const fn study_hours(&self) -> f64 {
        self.0[1]
    }

    /// Attendance coefficient.
    #[must_use]
    pub const fn attendance(&self) -> f64 {
        self.0[2]
    }

    /// Components in `[bias, study_hours, attendance]` order.
    #[must_use]
    pub const fn as_array(&self) -> [f64; 3] {
        self.0
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|w| w.is_finite())
    }

    /// Linear score `b + w1·x1 + w2·x2`.
    #[must_use]
    pub fn score(&self, point: StandardizedPoint) -> f64 {
        self.attendance().mul_add(
            point.attendance,
            self.study_hours().mul_add(point.study_hours, self.bias()),
        )
    }
}

impl From<[f64; 3]> for WeightVector {
    fn from(value: [f64; 3]) -> Self {
        Self(value)
    }
}

impl fmt::Display for WeightVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "z = {:.4} + {:.4} × study_hours + {:.4} × attendance",
            self.bias(),
            self.study_hours(),
            self.attendance()
        )
    }
}

/// Logistic function. Saturates to 0 or 1 instead of overflowing.
#[must_use]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Design matrix `[1, x1, x2]` and label vector, built once per dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingMatrix {
    design: Array2<f64>,
    labels: Array1<f64>,
}

impl TrainingMatrix {
    /// Packs standardized samples into the batch layout.
    #[must_use]
    pub fn from_samples(samples: &[StandardizedSample]) -> Self {
        let design = Array2::from_shape_fn((samples.len(), 3), |(row, col)| {
            let features = samples[row].features;
            match col {
                0 => 1.0,
                1 => features.study_hours,
                _ => features.attendance,
            }
        });
        let labels = samples.iter().map(StandardizedSample::label).collect();
        Self { design, labels }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Hypothesis for every row.
    #[must_use]
    pub fn probabilities(&self, weights: &WeightVector) -> Array1<f64> {
        self.design.dot(&aview1(&weights.0)).mapv_into(sigmoid)
    }
}

/// `sigmoid([1, x1, x2] · weights)`.
#[must_use]
pub fn hypothesis(weights: &WeightVector, point: StandardizedPoint) -> f64 {
    sigmoid(weights.score(point))
}

/// Mean cross-entropy with the hypothesis clamped away from 0 and 1.
/// Returns `0.0` for an empty matrix.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn loss(weights: &WeightVector, data: &TrainingMatrix) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let total: f64 = data
        .probabilities(weights)
        .iter()
        .zip(data.labels.iter())
        .map(|(&h, &y)| {
            let h = h.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
            (-y).mul_add(h.ln(), -(1.0 - y) * (1.0 - h).ln())
        })
        .sum();
    total / data.len() as f64
}

/// `grad_j = mean_i((h_i - y_i) * x_ij)` with `x_i0 = 1`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gradient(weights: &WeightVector, data: &TrainingMatrix) -> [f64; 3] {
    if data.is_empty() {
        return [0.0; 3];
    }
    let errors = data.probabilities(weights) - &data.labels;
    let grad = data.design.t().dot(&errors) / data.len() as f64;
    [grad[0], grad[1], grad[2]]
}

/// One full-batch update: `w_j - learning_rate * grad_j`.
#[must_use]
pub fn gradient_step(weights: &WeightVector, data: &TrainingMatrix, learning_rate: f64) -> WeightVector {
    let grad = gradient(weights, data);
    let mut next = weights.0;
    for (w, g) in next.iter_mut().zip(grad) {
        *w -= learning_rate * g;
    }
    WeightVector(next)
}

/// Holds the current weight vector and evaluates it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticModel {
    weights: WeightVector,
}

impl LogisticModel {
    /// Model with the given weights.
    #[must_use]
    pub const fn new(weights: WeightVector) -> Self {
        Self { weights }
    }

    /// Model with freshly drawn weights.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(WeightVector::random(rng))
    }

    /// Current weights.
    #[must_use]
    pub const fn weights(&self) -> WeightVector {
        self.weights
    }

    /// Replaces the weights.
    pub fn set_weights(&mut self, weights: WeightVector) {
        self.weights = weights;
    }

    /// Redraws the weights from `rng`.
    pub fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.weights = WeightVector::random(rng);
    }

    /// Probability of passing for a standardized point.
    #[must_use]
    pub fn hypothesis(&self, point: StandardizedPoint) -> f64 {
        hypothesis(&self.weights, point)
    }

    /// Loss of the current weights over `data`.
    #[must_use]
    pub fn loss(&self, data: &TrainingMatrix) -> f64 {
        loss(&self.weights, data)
    }

    /// Weights after one gradient step; the model itself is not modified.
    #[must_use]
    pub fn gradient_step(&self, data: &TrainingMatrix, learning_rate: f64) -> WeightVector {
        gradient_step(&self.weights, data, learning_rate)
    }
}
