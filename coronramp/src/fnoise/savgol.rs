//! Masked Savitzky-Golay smoothing with iterative sigma rejection.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::{eval_polynomial, fit_polynomial, median_and_sigma, nan_median};

/// Configuration for the smooth stripe estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavgolConfig {
    /// Samples covered by each local fit. Must be odd.
    /// Default: 31
    pub window: usize,
    /// Degree of the local polynomial.
    /// Default: 2
    pub polyorder: usize,
    /// Samples further than this many σ from the model are rejected.
    /// Default: 3.0
    pub sigma_clip: f32,
    /// Upper bound on reject/refit rounds.
    /// Default: 5
    pub max_iter: usize,
}

impl Default for SavgolConfig {
    fn default() -> Self {
        Self {
            window: 31,
            polyorder: 2,
            sigma_clip: 3.0,
            max_iter: 5,
        }
    }
}

impl SavgolConfig {
    /// Set the window length.
    ///
    /// # Panics
    /// Panics if `window` is even or not larger than the polynomial order.
    pub fn with_window(mut self, window: usize) -> Self {
        assert!(window % 2 == 1, "Savgol window must be odd");
        assert!(window > self.polyorder, "Savgol window must exceed polyorder");
        self.window = window;
        self
    }

    pub fn with_polyorder(mut self, polyorder: usize) -> Self {
        assert!(polyorder < self.window, "Savgol polyorder must be below window");
        self.polyorder = polyorder;
        self
    }

    pub fn with_sigma_clip(mut self, sigma_clip: f32) -> Self {
        assert!(sigma_clip > 0.0, "Sigma clip must be positive");
        self.sigma_clip = sigma_clip;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        assert!(max_iter >= 1, "At least one iteration is required");
        self.max_iter = max_iter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window % 2 == 0 || self.window <= self.polyorder {
            return Err(Error::InvalidConfig(format!(
                "savgol window {} must be odd and exceed polyorder {}",
                self.window, self.polyorder
            )));
        }
        if self.sigma_clip.is_nan() || self.sigma_clip <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "savgol sigma_clip must be positive, got {}",
                self.sigma_clip
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidConfig("savgol max_iter must be at least 1".into()));
        }
        Ok(())
    }
}

/// Smooth model of one row.
///
/// Starts from the median of the eligible samples, rejects samples deviating
/// from the current model and refits a local polynomial through the rest,
/// until the kept set stops changing or `max_iter` rounds ran. A row without
/// eligible finite samples models to zero.
pub fn smooth_row(values: &[f32], eligible: &[bool], config: &SavgolConfig) -> Vec<f32> {
    debug_assert_eq!(values.len(), eligible.len());
    let n = values.len();
    let base: Vec<bool> = values
        .iter()
        .zip(eligible)
        .map(|(v, &e)| e && v.is_finite())
        .collect();

    let kept_values: Vec<f32> = values
        .iter()
        .zip(&base)
        .filter_map(|(&v, &b)| b.then_some(v))
        .collect();
    let mut scratch = Vec::with_capacity(kept_values.len());
    let Some(seed) = nan_median(&kept_values, &mut scratch) else {
        return vec![0.0; n];
    };

    let mut model = vec![seed; n];
    let mut keep = base.clone();
    for iter in 0..config.max_iter {
        let Some(next_keep) = clip(values, &base, &model, config.sigma_clip, &mut scratch) else {
            break;
        };
        if iter > 0 && next_keep == keep {
            break;
        }
        keep = next_keep;
        model = local_fit(values, &keep, config, seed);
    }
    model
}

/// Eligible samples within `sigma_clip` robust σ of the model, or `None` when
/// the residual spread collapses or nothing would survive.
fn clip(
    values: &[f32],
    base: &[bool],
    model: &[f32],
    sigma_clip: f32,
    scratch: &mut Vec<f32>,
) -> Option<Vec<bool>> {
    let residuals: Vec<f32> = values
        .iter()
        .zip(model)
        .zip(base)
        .map(|((&v, &m), &b)| if b { v - m } else { f32::NAN })
        .collect();
    let (center, sigma) = median_and_sigma(&residuals, scratch)?;
    if sigma <= 0.0 {
        return None;
    }
    let limit = sigma_clip * sigma;
    let keep: Vec<bool> = residuals
        .iter()
        .map(|&r| r.is_finite() && (r - center).abs() <= limit)
        .collect();
    keep.iter().any(|&k| k).then_some(keep)
}

/// Local polynomial value at every position from the kept samples in its
/// window. Windows with too few samples drop degree; empty windows fall back
/// to `fallback`.
fn local_fit(values: &[f32], keep: &[bool], config: &SavgolConfig, fallback: f32) -> Vec<f32> {
    let n = values.len();
    let half = config.window / 2;
    let scale = half.max(1) as f64;
    let mut xs = Vec::with_capacity(config.window);
    let mut ys = Vec::with_capacity(config.window);

    (0..n)
        .map(|c| {
            xs.clear();
            ys.clear();
            let lo = c.saturating_sub(half);
            let hi = (c + half).min(n - 1);
            for k in lo..=hi {
                if keep[k] {
                    xs.push((k as f64 - c as f64) / scale);
                    ys.push(values[k] as f64);
                }
            }
            if xs.is_empty() {
                return fallback;
            }
            let degree = config.polyorder.min(xs.len() - 1);
            match fit_polynomial(&xs, &ys, degree) {
                Some(coeffs) => eval_polynomial(&coeffs, 0.0) as f32,
                None => (ys.iter().sum::<f64>() / ys.len() as f64) as f32,
            }
        })
        .collect()
}
