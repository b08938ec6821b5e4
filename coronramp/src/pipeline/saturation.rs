//! Saturation flag shaping around the standard saturation step.

use tracing::info;

use super::steps::{StandardStep, StepOutput, StepRunner};
use crate::common::Frame;
use crate::config::SaturationConfig;
use crate::dq::{DqFlags, or_flags_where};
use crate::mask::expand_mask;
use crate::ramp::RampCube;

/// OR `SATURATED` into every group of pixels carrying `RC` in the pixel DQ.
pub fn flag_rc_saturated(ramp: &mut RampCube) -> Frame<bool> {
    let rc = ramp.pixel_flag_mask(DqFlags::RC);
    if rc.any() {
        let shape = ramp.shape();
        for int in 0..shape.nints {
            for group in 0..shape.ngroups {
                or_flags_where(ramp.group_dq_mut(int, group), rc.pixels(), DqFlags::SATURATED);
            }
        }
    }
    rc
}

/// Grow each group's `SATURATED` flags by `n_pix` along rows and columns.
pub fn grow_group_saturation(ramp: &mut RampCube, n_pix: usize) {
    let shape = ramp.shape();
    for int in 0..shape.nints {
        for group in 0..shape.ngroups {
            let saturated = ramp.group_flag_mask(int, group, DqFlags::SATURATED);
            if !saturated.any() {
                continue;
            }
            let grown = expand_mask(&saturated, n_pix, false);
            or_flags_where(ramp.group_dq_mut(int, group), grown.pixels(), DqFlags::SATURATED);
        }
    }
}

/// Zero the zero-frame pixels near saturated ones.
///
/// A zero-frame value of exactly zero marks saturation; RC pixels count too
/// when `rc` is given.
pub fn grow_zeroframe_saturation(ramp: &mut RampCube, n_pix: usize, rc: Option<&Frame<bool>>) {
    let shape = ramp.shape();
    for int in 0..shape.nints {
        let Some(zeroframe) = ramp.zeroframe_mut(int) else {
            return;
        };
        let mut saturated = Frame::new(
            shape.rows,
            shape.cols,
            zeroframe.iter().map(|&v| v == 0.0).collect(),
        );
        if let Some(rc) = rc {
            saturated.or_assign(rc);
        }
        let grown = expand_mask(&saturated, n_pix, false);
        for (v, &g) in zeroframe.iter_mut().zip(grown.pixels()) {
            if g {
                *v = 0.0;
            }
        }
    }
}

/// Near-infrared saturation: RC flagging, the standard step, then
/// non-diagonal growth when the step itself would grow diagonally.
pub fn run_custom_saturation<R: StepRunner + ?Sized>(
    runner: &mut R,
    mut ramp: RampCube,
    config: &SaturationConfig,
) -> anyhow::Result<StepOutput<RampCube>> {
    let rc = config.flag_rcsat.then(|| flag_rc_saturated(&mut ramp));

    if config.grow_diagonal || config.n_pix_grow_sat == 0 {
        return runner.run_ramp_step(
            StandardStep::Saturation {
                n_pix_grow_sat: config.n_pix_grow_sat,
                grow_diagonal: config.grow_diagonal,
            },
            ramp,
        );
    }

    let mut output = runner.run_ramp_step(
        StandardStep::Saturation {
            n_pix_grow_sat: 0,
            grow_diagonal: false,
        },
        ramp,
    )?;

    info!(
        n_pix = config.n_pix_grow_sat,
        "Growing saturation flags without diagonal growth"
    );
    grow_group_saturation(&mut output.product, config.n_pix_grow_sat);
    if output.product.has_zeroframe() {
        grow_zeroframe_saturation(&mut output.product, config.n_pix_grow_sat, rc.as_ref());
    }
    Ok(output)
}
