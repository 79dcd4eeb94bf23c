//! Minimal recurrent regressor.
//!
//! An Elman network reads the window one value at a time
//! (`h_t = tanh(w_x * x_t + W_h h_{t-1} + b_h)`), and a linear head maps the
//! final hidden state to the next normalized value. Training is full-batch
//! gradient descent with backpropagation through time and mean squared
//! error. No early stopping, no validation split.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};
use crate::window::{Window, WINDOW};

/// Largest L2 norm a single update's gradient may have
pub const MAX_GRADIENT_NORM: f64 = 1.0;

/// Trained weights of the recurrent model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModel {
    hidden_size: usize,
    /// Input-to-hidden weights, one per hidden unit
    w_x: Vec<f64>,
    /// Hidden-to-hidden weights, row-major `hidden_size x hidden_size`
    w_h: Vec<f64>,
    b_h: Vec<f64>,
    w_out: Vec<f64>,
    b_out: f64,
}

/// Gradient accumulator with the same layout as the model.
struct Gradients {
    w_x: Vec<f64>,
    w_h: Vec<f64>,
    b_h: Vec<f64>,
    w_out: Vec<f64>,
    b_out: f64,
}

impl Gradients {
    fn norm(&self) -> f64 {
        self.w_x
            .iter()
            .chain(&self.w_h)
            .chain(&self.b_h)
            .chain(&self.w_out)
            .chain(std::iter::once(&self.b_out))
            .map(|g| g * g)
            .sum::<f64>()
            .sqrt()
    }

    fn zeros(hidden_size: usize) -> Self {
        Self {
            w_x: vec![0.0; hidden_size],
            w_h: vec![0.0; hidden_size * hidden_size],
            b_h: vec![0.0; hidden_size],
            w_out: vec![0.0; hidden_size],
            b_out: 0.0,
        }
    }
}

impl SequenceModel {
    /// Create a model with weights drawn uniformly from `±1/sqrt(hidden_size)`.
    ///
    /// The same `seed` always yields the same weights.
    pub fn new(hidden_size: usize, seed: u64) -> Self {
        let hidden_size = hidden_size.max(1);
        let bound = 1.0 / (hidden_size as f64).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut draw = |n: usize| -> Vec<f64> { (0..n).map(|_| rng.gen_range(-bound..bound)).collect() };

        let w_x = draw(hidden_size);
        let w_h = draw(hidden_size * hidden_size);
        let b_h = draw(hidden_size);
        let w_out = draw(hidden_size);
        let b_out = draw(1)[0];

        Self {
            hidden_size,
            w_x,
            w_h,
            b_h,
            w_out,
            b_out,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Verify weight shapes and values after deserialization.
    pub fn check(&self) -> ForecastResult<()> {
        let h = self.hidden_size;
        if h == 0
            || self.w_x.len() != h
            || self.w_h.len() != h * h
            || self.b_h.len() != h
            || self.w_out.len() != h
        {
            return Err(ForecastError::artifact("model weights have inconsistent shapes"));
        }
        let all_finite = self
            .w_x
            .iter()
            .chain(&self.w_h)
            .chain(&self.b_h)
            .chain(&self.w_out)
            .chain(std::iter::once(&self.b_out))
            .all(|w| w.is_finite());
        if !all_finite {
            return Err(ForecastError::artifact("model weights are not finite"));
        }
        Ok(())
    }

    /// Predict the next normalized value from a normalized window.
    pub fn forward(&self, inputs: &[f64; WINDOW]) -> f64 {
        let states = self.hidden_states(inputs);
        self.output(&states[WINDOW])
    }

    /// Hidden states `h_0..=h_WINDOW`, with `h_0` all zeros.
    fn hidden_states(&self, inputs: &[f64; WINDOW]) -> Vec<Vec<f64>> {
        let h = self.hidden_size;
        let mut states = Vec::with_capacity(WINDOW + 1);
        states.push(vec![0.0; h]);

        for &x in inputs {
            let prev = &states[states.len() - 1];
            let next: Vec<f64> = (0..h)
                .map(|i| {
                    let recurrent: f64 = (0..h).map(|j| self.w_h[i * h + j] * prev[j]).sum();
                    (self.w_x[i] * x + recurrent + self.b_h[i]).tanh()
                })
                .collect();
            states.push(next);
        }
        states
    }

    fn output(&self, last: &[f64]) -> f64 {
        self.w_out.iter().zip(last).map(|(w, h)| w * h).sum::<f64>() + self.b_out
    }

    /// Mean squared error over `windows`.
    pub fn loss(&self, windows: &[Window]) -> f64 {
        if windows.is_empty() {
            return 0.0;
        }
        let total: f64 = windows
            .iter()
            .map(|w| (self.forward(&w.inputs) - w.target).powi(2))
            .sum();
        total / windows.len() as f64
    }

    /// Run one full-batch gradient descent step.
    ///
    /// The gradient is rescaled to at most `MAX_GRADIENT_NORM` before the
    /// update, so weights stay finite whatever the learning rate.
    /// Returns the loss measured before the update.
    pub fn train_step(&mut self, windows: &[Window], learning_rate: f64) -> f64 {
        if windows.is_empty() {
            return 0.0;
        }
        let (grads, loss) = self.gradients(windows);
        let norm = grads.norm();
        let scale = if norm > MAX_GRADIENT_NORM {
            MAX_GRADIENT_NORM / norm
        } else {
            1.0
        };
        self.apply(&grads, learning_rate * scale);
        loss
    }

    /// Mean squared error gradient over `windows`, with the loss.
    fn gradients(&self, windows: &[Window]) -> (Gradients, f64) {
        let h = self.hidden_size;
        let n = windows.len() as f64;
        let mut grads = Gradients::zeros(h);
        let mut loss = 0.0;

        for window in windows {
            let states = self.hidden_states(&window.inputs);
            let prediction = self.output(&states[WINDOW]);
            let error = prediction - window.target;
            loss += error * error;

            let d_out = 2.0 * error / n;
            grads.b_out += d_out;
            for i in 0..h {
                grads.w_out[i] += d_out * states[WINDOW][i];
            }

            let mut d_hidden: Vec<f64> = self.w_out.iter().map(|w| d_out * w).collect();
            for t in (1..=WINDOW).rev() {
                let current = &states[t];
                let previous = &states[t - 1];
                let d_pre: Vec<f64> = (0..h)
                    .map(|i| d_hidden[i] * (1.0 - current[i] * current[i]))
                    .collect();

                let x = window.inputs[t - 1];
                for i in 0..h {
                    grads.w_x[i] += d_pre[i] * x;
                    grads.b_h[i] += d_pre[i];
                    for j in 0..h {
                        grads.w_h[i * h + j] += d_pre[i] * previous[j];
                    }
                }

                d_hidden = (0..h)
                    .map(|j| (0..h).map(|i| self.w_h[i * h + j] * d_pre[i]).sum())
                    .collect();
            }
        }

        (grads, loss / n)
    }

    fn apply(&mut self, grads: &Gradients, learning_rate: f64) {
        fn step(weights: &mut [f64], grad: &[f64], learning_rate: f64) {
            for (w, g) in weights.iter_mut().zip(grad) {
                *w -= learning_rate * g;
            }
        }
        step(&mut self.w_x, &grads.w_x, learning_rate);
        step(&mut self.w_h, &grads.w_h, learning_rate);
        step(&mut self.b_h, &grads.b_h, learning_rate);
        step(&mut self.w_out, &grads.w_out, learning_rate);
        self.b_out -= learning_rate * grads.b_out;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::window::build_windows;

    fn sine_windows() -> Vec<Window> {
        let series: Vec<f64> = (0..40).map(|i| (f64::from(i) * 0.4).sin()).collect();
        build_windows(&series)
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        assert_eq!(SequenceModel::new(8, 7), SequenceModel::new(8, 7));
        assert_ne!(SequenceModel::new(8, 7), SequenceModel::new(8, 8));
    }

    #[test]
    fn test_new_model_is_well_formed() {
        let model = SequenceModel::new(4, 1);
        assert_eq!(model.hidden_size(), 4);
        assert!(model.check().is_ok());
    }

    #[test]
    fn test_zero_hidden_size_is_clamped() {
        assert_eq!(SequenceModel::new(0, 1).hidden_size(), 1);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let model = SequenceModel::new(8, 3);
        let a = model.forward(&[0.1, -0.2, 0.3]);
        let b = model.forward(&[0.1, -0.2, 0.3]);
        assert_eq!(a, b);
        assert!(a.is_finite());
    }

    #[test]
    fn test_training_reduces_loss() {
        let windows = sine_windows();
        let mut model = SequenceModel::new(8, 42);
        let initial = model.loss(&windows);

        for _ in 0..300 {
            model.train_step(&windows, 0.05);
        }

        assert!(model.loss(&windows) < initial);
    }

    #[test]
    fn test_train_step_reports_pre_update_loss() {
        let windows = sine_windows();
        let mut model = SequenceModel::new(8, 42);
        let before = model.loss(&windows);
        let reported = model.train_step(&windows, 0.05);
        assert!((before - reported).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let windows = sine_windows();
        let model = SequenceModel::new(3, 11);
        let eps = 1e-6;

        let analytic = model.gradients(&windows).0.b_out;

        let mut plus = model.clone();
        plus.b_out += eps;
        let mut minus = model.clone();
        minus.b_out -= eps;
        let numeric = (plus.loss(&windows) - minus.loss(&windows)) / (2.0 * eps);

        assert!((analytic - numeric).abs() < 1e-5, "{analytic} vs {numeric}");
    }

    #[test]
    fn test_large_learning_rate_keeps_weights_finite() {
        let windows = sine_windows();
        let mut model = SequenceModel::new(8, 42);

        for _ in 0..500 {
            let loss = model.train_step(&windows, 5.0);
            assert!(loss.is_finite());
        }

        assert!(model.check().is_ok());
        assert!(model.forward(&[0.1, 0.2, 0.3]).is_finite());
    }

    #[test]
    fn test_update_size_is_bounded() {
        let windows = sine_windows();
        let before = SequenceModel::new(8, 42);
        let mut after = before.clone();
        after.train_step(&windows, 3.0);

        let moved = before
            .w_x
            .iter()
            .zip(&after.w_x)
            .chain(before.w_h.iter().zip(&after.w_h))
            .chain(before.b_h.iter().zip(&after.b_h))
            .chain(before.w_out.iter().zip(&after.w_out))
            .chain(std::iter::once((&before.b_out, &after.b_out)))
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        assert!(moved <= 3.0 * MAX_GRADIENT_NORM + 1e-9, "moved {moved}");
    }

    #[test]
    fn test_check_rejects_bad_shapes() {
        let mut model = SequenceModel::new(4, 1);
        model.w_h.pop();
        assert!(matches!(model.check(), Err(ForecastError::Artifact(_))));

        let mut model = SequenceModel::new(4, 1);
        model.b_out = f64::NAN;
        assert!(matches!(model.check(), Err(ForecastError::Artifact(_))));
    }
}
