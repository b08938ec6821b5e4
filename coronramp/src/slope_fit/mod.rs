//! Per-pixel polynomial fits along the ramp time axis.
//!
//! Each pixel is fit once, using the longest run of leading groups that are
//! neither flagged nor above `sat_frac` of the saturation threshold. Groups
//! are scanned from the last one backward, so pixels that saturate early are
//! fit with fewer samples than clean ones.


use rayon::prelude::*;
use tracing::{debug, warn};

use crate::common::Frame;
use crate::error::{Error, Result};
use crate::math::PolyProjection;
use crate::ramp::RampCube;

/// Highest polynomial degree accepted for ramp fits.
pub const MAX_DEGREE: usize = 4;

/// Configuration for [`fit_integration`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeFitConfig {
    /// Fraction of the saturation threshold above which a group is unusable.
    /// Default: 0.5
    pub sat_frac: f32,
    /// Requested polynomial degree. Reduced per pixel when fewer than
    /// `degree + 1` groups are usable.
    /// Default: 1
    pub degree: usize,
    /// Also fit pixels whose only usable group is the first one.
    /// Default: false
    pub fit_zero: bool,
}

impl Default for SlopeFitConfig {
    fn default() -> Self {
        Self {
            sat_frac: 0.5,
            degree: 1,
            fit_zero: false,
        }
    }
}

impl SlopeFitConfig {
    /// Set the saturation fraction.
    ///
    /// # Panics
    /// Panics if `sat_frac` is not positive.
    pub fn with_sat_frac(mut self, sat_frac: f32) -> Self {
        assert!(sat_frac > 0.0, "Saturation fraction must be positive");
        self.sat_frac = sat_frac;
        self
    }

    /// Set the polynomial degree.
    ///
    /// # Panics
    /// Panics if degree is greater than [`MAX_DEGREE`].
    pub fn with_degree(mut self, degree: usize) -> Self {
        assert!(degree <= MAX_DEGREE, "Polynomial degree must be 0-4");
        self.degree = degree;
        self
    }

    pub fn with_fit_zero(mut self, fit_zero: bool) -> Self {
        self.fit_zero = fit_zero;
        self
    }

    /// Checks values that arrive from deserialized configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sat_frac.is_nan() || self.sat_frac <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sat_frac must be positive, got {}",
                self.sat_frac
            )));
        }
        if self.degree > MAX_DEGREE {
            return Err(Error::InvalidConfig(format!(
                "polynomial degree must be at most {MAX_DEGREE}, got {}",
                self.degree
            )));
        }
        Ok(())
    }
}

/// Per-pixel fit results for one integration.
#[derive(Debug, Clone, PartialEq)]
pub struct RampFit {
    /// Intercept at t = 0, in counts.
    pub bias: Frame<f32>,
    /// First-order coefficient, in counts per second.
    pub slope: Frame<f32>,
    /// Reduced chi-square assuming unit variance; 0 without spare samples.
    pub chi2: Frame<f32>,
    /// Number of leading groups used; 0 for pixels never fit.
    pub groups_used: Frame<u16>,
    /// `(t_first, t_last)` in seconds: the span the fit basis normalizes to
    /// `[-1, 1]`.
    pub time_bounds: Frame<(f32, f32)>,
}

impl RampFit {
    fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            bias: Frame::new_default(rows, cols),
            slope: Frame::new_default(rows, cols),
            chi2: Frame::new_default(rows, cols),
            groups_used: Frame::new_default(rows, cols),
            time_bounds: Frame::new_default(rows, cols),
        }
    }

    /// Number of pixels that received a fit.
    pub fn fitted_pixels(&self) -> usize {
        self.groups_used.iter().filter(|&&n| n > 0).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct PixelFit {
    bias: f32,
    slope: f32,
    chi2: f32,
    bounds: (f32, f32),
}

/// Fit one integration.
///
/// `groups` is the integration's data laid out `[group, row, col]`;
/// `bad_masks[g]` is true where the pixel must not be used at group `g`.
/// Masks are made cumulative here, so a flag at group `g` excludes every
/// later group as well.
pub fn fit_integration(
    times: &[f64],
    groups: &[f32],
    sat_thresh: &Frame<f32>,
    bad_masks: &[Frame<bool>],
    config: &SlopeFitConfig,
) -> Result<RampFit> {
    config.validate()?;
    let ngroups = times.len();
    let (rows, cols) = sat_thresh.shape();
    let npix = rows * cols;

    if ngroups == 0 {
        return Err(Error::TooFewGroups {
            ngroups,
            required: 1,
        });
    }
    if groups.len() != ngroups * npix {
        return Err(Error::ShapeMismatch {
            what: "integration data",
            expected: vec![ngroups, rows, cols],
            actual: vec![groups.len()],
        });
    }
    if bad_masks.len() != ngroups || bad_masks.iter().any(|m| m.shape() != (rows, cols)) {
        return Err(Error::ShapeMismatch {
            what: "bad-pixel masks",
            expected: vec![ngroups, rows, cols],
            actual: vec![bad_masks.len()],
        });
    }

    let usable = leading_usable_groups(groups, ngroups, sat_thresh, bad_masks, config.sat_frac);

    let mut fit = RampFit::zeros(rows, cols);
    let mut assigned: Frame<bool> = Frame::new_default(rows, cols);
    let last_index = if config.fit_zero { 0 } else { 1 };

    for i in (last_index..ngroups).rev() {
        let n_samples = i + 1;
        let candidates: Vec<usize> = (0..npix)
            .filter(|&p| !assigned[p] && usable[p] >= n_samples)
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let degree = config.degree.min(i);
        let Some(projection) = PolyProjection::new(&times[..n_samples], degree) else {
            warn!(groups = n_samples, degree, "Singular ramp fit basis, pixels left unfit");
            continue;
        };

        let results: Vec<(usize, PixelFit)> = candidates
            .par_iter()
            .map(|&p| {
                let ys: Vec<f64> = (0..n_samples).map(|g| groups[g * npix + p] as f64).collect();
                (p, fit_pixel(&projection, &ys))
            })
            .collect();

        debug!(groups = n_samples, degree, pixels = results.len(), "Fitted ramp segment");

        for (p, pixel) in results {
            assigned[p] = true;
            fit.bias[p] = pixel.bias;
            fit.slope[p] = pixel.slope;
            fit.chi2[p] = pixel.chi2;
            fit.groups_used[p] = n_samples as u16;
            fit.time_bounds[p] = pixel.bounds;
        }
    }

    Ok(fit)
}

fn fit_pixel(projection: &PolyProjection, ys: &[f64]) -> PixelFit {
    let coeffs = projection.fit(ys);
    let (bias, slope) = projection.physical_bias_slope(&coeffs);
    let (t_first, t_last) = projection.bounds();
    PixelFit {
        bias: bias as f32,
        slope: slope as f32,
        chi2: projection.reduced_chi_square(ys, &coeffs) as f32,
        bounds: (t_first as f32, t_last as f32),
    }
}

/// Count of leading groups per pixel before the first masked, saturated or
/// non-finite sample.
fn leading_usable_groups(
    groups: &[f32],
    ngroups: usize,
    sat_thresh: &Frame<f32>,
    bad_masks: &[Frame<bool>],
    sat_frac: f32,
) -> Vec<usize> {
    let npix = sat_thresh.len();
    (0..npix)
        .into_par_iter()
        .map(|p| {
            let limit = sat_frac * sat_thresh[p];
            (0..ngroups)
                .take_while(|&g| {
                    let v = groups[g * npix + p];
                    !bad_masks[g][p] && v.is_finite() && (v < limit || limit.is_nan())
                })
                .count()
        })
        .collect()
}

/// Slope fits for every integration of an exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSlopes {
    pub integrations: Vec<RampFit>,
}

impl ExposureSlopes {
    pub fn nints(&self) -> usize {
        self.integrations.len()
    }

    pub fn bias(&self, int: usize) -> &Frame<f32> {
        &self.integrations[int].bias
    }

    pub fn slope(&self, int: usize) -> &Frame<f32> {
        &self.integrations[int].slope
    }
}

/// Fit every integration of `ramp`, treating any nonzero group DQ as bad.
pub fn fit_exposure_slopes(
    ramp: &RampCube,
    sat_thresh: &Frame<f32>,
    config: &SlopeFitConfig,
) -> Result<ExposureSlopes> {
    let shape = ramp.shape();
    if sat_thresh.shape() != (shape.rows, shape.cols) {
        return Err(Error::ShapeMismatch {
            what: "saturation threshold",
            expected: vec![shape.rows, shape.cols],
            actual: vec![sat_thresh.rows(), sat_thresh.cols()],
        });
    }

    let times = ramp.meta.group_times();
    let integrations = (0..shape.nints)
        .map(|int| {
            let bad = ramp.cumulative_bad_masks(int);
            let fit = fit_integration(&times, ramp.integration(int), sat_thresh, &bad, config)?;
            debug!(
                integration = int,
                fitted = fit.fitted_pixels(),
                total = shape.frame_len(),
                "Integration slopes"
            );
            Ok(fit)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExposureSlopes { integrations })
}
