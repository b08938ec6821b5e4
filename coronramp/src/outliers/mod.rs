//! Rate-image outlier detection folded back into ramp DQ.


use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::Frame;
use crate::dq::{DqFlags, or_flags_where};
use crate::error::Error;
use crate::math::{median_and_sigma, median_f32_mut};
use crate::ramp::{RampCube, RateCube};

/// Flags raised on every group of an outlier pixel.
pub const OUTLIER_FLAGS: DqFlags = DqFlags::DO_NOT_USE.union(DqFlags::JUMP_DET);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Rejection threshold in robust σ.
    /// Default: 5.0
    pub sigma_cut: f32,
    /// Fewer integrations than this disables detection.
    /// Default: 5
    pub nint_min: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            sigma_cut: 5.0,
            nint_min: 5,
        }
    }
}

/// Finds per-integration outlier pixels in a stack of rate images.
pub trait CubeOutlierDetector {
    /// One mask per input frame, true on outliers. Must return all-false
    /// masks when fewer than `nint_min` frames are given.
    fn detect(
        &self,
        frames: &[&Frame<f32>],
        sigma_cut: f32,
        nint_min: usize,
    ) -> anyhow::Result<Vec<Frame<bool>>>;
}

/// Per-pixel sigma clipping across integrations.
///
/// A sample is an outlier when it lies more than `sigma_cut` σ from the
/// pixel's median over integrations. σ is the pixel's MAD-based σ, floored
/// at the median σ of the frame so constant pixels do not flag every
/// fluctuation. Non-finite rates are always outliers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigmaClipOutlierDetector;

impl CubeOutlierDetector for SigmaClipOutlierDetector {
    fn detect(
        &self,
        frames: &[&Frame<f32>],
        sigma_cut: f32,
        nint_min: usize,
    ) -> anyhow::Result<Vec<Frame<bool>>> {
        let Some(first) = frames.first() else {
            return Ok(Vec::new());
        };
        let (rows, cols) = first.shape();
        if let Some(bad) = frames.iter().find(|f| f.shape() != (rows, cols)) {
            return Err(Error::ShapeMismatch {
                what: "rate cube frame",
                expected: vec![rows, cols],
                actual: vec![bad.rows(), bad.cols()],
            }
            .into());
        }

        let nints = frames.len();
        let mut masks = vec![Frame::new_default(rows, cols); nints];
        if nints < nint_min {
            return Ok(masks);
        }

        let stats: Vec<Option<(f32, f32)>> = (0..rows * cols)
            .into_par_iter()
            .map(|p| {
                let samples: Vec<f32> = frames.iter().map(|f| f[p]).collect();
                let mut scratch = Vec::with_capacity(nints);
                median_and_sigma(&samples, &mut scratch)
            })
            .collect();

        let mut sigmas: Vec<f32> = stats.iter().flatten().map(|&(_, s)| s).collect();
        let floor = if sigmas.is_empty() {
            0.0
        } else {
            median_f32_mut(&mut sigmas)
        };

        for (p, stat) in stats.iter().enumerate() {
            for (mask, frame) in masks.iter_mut().zip(frames) {
                let v = frame[p];
                mask[p] = match stat {
                    _ if !v.is_finite() => true,
                    Some((median, sigma)) => (v - median).abs() > sigma_cut * sigma.max(floor),
                    None => true,
                };
            }
        }
        Ok(masks)
    }
}

/// Result of folding outliers into the ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierStatus {
    /// No pixel was flagged; the ramp is unchanged.
    Skipped,
    /// `flagged` pixel-integrations received [`OUTLIER_FLAGS`] on every group.
    Applied { flagged: usize },
}

impl OutlierStatus {
    pub fn is_skipped(&self) -> bool {
        matches!(self, OutlierStatus::Skipped)
    }
}

/// Detect outliers in `rateints` and flag them on every group of `ramp`.
///
/// MIRI's first integration is left out of detection and never flagged.
pub fn apply_rateint_outliers(
    rateints: &RateCube,
    mut ramp: RampCube,
    detector: &dyn CubeOutlierDetector,
    config: &OutlierConfig,
) -> anyhow::Result<(RampCube, OutlierStatus)> {
    let shape = ramp.shape();
    if rateints.nints() != shape.nints
        || rateints
            .frames()
            .any(|f| f.shape() != (shape.rows, shape.cols))
    {
        return Err(Error::ShapeMismatch {
            what: "rateints",
            expected: vec![shape.nints, shape.rows, shape.cols],
            actual: vec![rateints.nints()],
        }
        .into());
    }

    let first_int = usize::from(ramp.meta.instrument.is_miri());
    let frames: Vec<&Frame<f32>> = rateints.frames().skip(first_int).collect();
    let masks = detector
        .detect(&frames, config.sigma_cut, config.nint_min)
        .context("Rate cube outlier detection failed")?;
    if masks.len() != frames.len() {
        return Err(Error::ShapeMismatch {
            what: "outlier masks",
            expected: vec![frames.len(), shape.rows, shape.cols],
            actual: vec![masks.len()],
        }
        .into());
    }

    let flagged: usize = masks.iter().map(Frame::count_true).sum();
    if flagged == 0 {
        info!(
            integrations = frames.len(),
            nint_min = config.nint_min,
            "No rateint outliers flagged"
        );
        return Ok((ramp, OutlierStatus::Skipped));
    }

    for (offset, mask) in masks.iter().enumerate() {
        let int = offset + first_int;
        for group in 0..shape.ngroups {
            or_flags_where(ramp.group_dq_mut(int, group), mask.pixels(), OUTLIER_FLAGS);
        }
    }
    info!(flagged, sigma_cut = config.sigma_cut, "Flagged rateint outliers in ramp DQ");

    Ok((ramp, OutlierStatus::Applied { flagged }))
}
