//! Pseudo reference pixels for subarrays without real ones.

use std::ops::Range;

use tracing::info;

use super::steps::{StandardStep, StepOutput, StepRunner};
use crate::common::Frame;
use crate::config::RefPixBorders;
use crate::dq::DqFlags;
use crate::ramp::RampCube;

/// Row and column ranges of the four border strips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderRegions {
    pub rows: Vec<Range<usize>>,
    pub cols: Vec<Range<usize>>,
}

impl BorderRegions {
    /// Strips clamped to a `rows × cols` frame. Empty strips are dropped.
    pub fn new(borders: &RefPixBorders, rows: usize, cols: usize) -> Self {
        let strips = |n_low: usize, n_high: usize, offset: usize, len: usize| {
            let low_start = offset.min(len);
            let low = low_start..(offset + n_low).min(len);
            let high_end = len.saturating_sub(offset);
            let high = high_end.saturating_sub(n_high)..high_end;
            [low, high]
                .into_iter()
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            rows: strips(borders.nlower, borders.nupper, borders.nrow_off, rows),
            cols: strips(borders.nleft, borders.nright, borders.ncol_off, cols),
        }
    }

    /// True on every pixel inside a border strip.
    pub fn mask(&self, rows: usize, cols: usize) -> Frame<bool> {
        let mut mask = Frame::new_default(rows, cols);
        for range in &self.rows {
            for r in range.clone() {
                mask.row_mut(r).fill(true);
            }
        }
        for range in &self.cols {
            for r in 0..rows {
                mask.row_mut(r)[range.clone()].fill(true);
            }
        }
        mask
    }
}

/// Whether the border strips are flagged around the standard step.
pub fn uses_pseudo_refpix(ramp: &RampCube, borders: &RefPixBorders) -> bool {
    !ramp.meta.is_full_frame() && borders.total() > 0
}

/// Reference-pixel correction with temporary border flags on subarrays.
///
/// Full-frame data or empty borders go straight to the standard step.
/// Otherwise the border strips are flagged `REFERENCE_PIXEL`, the step runs,
/// and the strips get their previous pixel DQ back.
pub fn run_refpix<R: StepRunner + ?Sized>(
    runner: &mut R,
    mut ramp: RampCube,
    borders: &RefPixBorders,
) -> anyhow::Result<StepOutput<RampCube>> {
    if !uses_pseudo_refpix(&ramp, borders) {
        return runner.run_ramp_step(
            StandardStep::RefPix {
                use_side_ref_pixels: true,
            },
            ramp,
        );
    }

    info!(
        lower = borders.nlower,
        upper = borders.nupper,
        "Flagging pseudo reference rows"
    );
    info!(
        left = borders.nleft,
        right = borders.nright,
        "Flagging pseudo reference columns"
    );

    let shape = ramp.shape();
    let border = BorderRegions::new(borders, shape.rows, shape.cols).mask(shape.rows, shape.cols);
    let original = ramp.pixeldq().clone();
    let reference = DqFlags::REFERENCE_PIXEL.bits();
    for (dq, &b) in ramp.pixeldq_mut().iter_mut().zip(border.pixels()) {
        if b {
            *dq |= reference;
        }
    }

    let mut output = runner.run_ramp_step(
        StandardStep::RefPix {
            use_side_ref_pixels: borders.has_side_columns(),
        },
        ramp,
    )?;

    info!("Removing pseudo reference pixel flags");
    let restored = output.product.pixeldq_mut();
    for ((dq, &orig), &b) in restored.iter_mut().zip(original.pixels()).zip(border.pixels()) {
        if b {
            *dq = orig;
        }
    }
    Ok(output)
}
