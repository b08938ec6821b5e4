//! kTC bias and 1/f stripe removal on bias-free ramps.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::common::Frame;
use crate::error::{Error, Result};
use crate::fnoise::{FnoiseConfig, subtract_fnoise};
use crate::ramp::RampCube;
use crate::slope_fit::{ExposureSlopes, SlopeFitConfig, fit_exposure_slopes};

/// Subtract each integration's bias frame from all of its groups.
pub fn subtract_bias(mut ramp: RampCube, slopes: &ExposureSlopes) -> Result<RampCube> {
    let shape = ramp.shape();
    if slopes.nints() != shape.nints
        || slopes
            .integrations
            .iter()
            .any(|fit| fit.bias.shape() != (shape.rows, shape.cols))
    {
        return Err(Error::ShapeMismatch {
            what: "bias cube",
            expected: vec![shape.nints, shape.rows, shape.cols],
            actual: vec![slopes.nints()],
        });
    }

    let frame_len = shape.frame_len();
    for int in 0..shape.nints {
        let bias = slopes.bias(int).pixels();
        ramp.integration_mut(int)
            .par_chunks_mut(frame_len)
            .for_each(|group| {
                for (v, &b) in group.iter_mut().zip(bias) {
                    *v -= b;
                }
            });
    }
    Ok(ramp)
}

/// Fit ramp intercepts and remove them.
///
/// A single-group ramp has no intercept to fit unless `fit_zero` is set and
/// is returned unchanged.
pub fn remove_bias(
    ramp: RampCube,
    sat_thresh: &Frame<f32>,
    config: &SlopeFitConfig,
) -> Result<RampCube> {
    if ramp.shape().ngroups < 2 && !config.fit_zero {
        warn!(ngroups = ramp.shape().ngroups, "Too few groups for kTC bias fit, skipping");
        return Ok(ramp);
    }
    let slopes = fit_exposure_slopes(&ramp, sat_thresh, config)?;
    info!(nints = slopes.nints(), "Subtracting kTC bias");
    subtract_bias(ramp, &slopes)
}

/// Refit slopes on a bias-free ramp and remove 1/f stripes.
///
/// The refit runs with default slope-fit settings; only the slopes are used,
/// to locate signal.
pub fn remove_stripes(
    ramp: RampCube,
    sat_thresh: &Frame<f32>,
    config: &FnoiseConfig,
) -> Result<RampCube> {
    let slopes = fit_exposure_slopes(&ramp, sat_thresh, &SlopeFitConfig::default())?;
    subtract_fnoise(ramp, &slopes, config)
}
