//! Binary mask morphology for flag growth and exclusion zones.


use rayon::prelude::*;

use crate::common::Frame;

/// Neighborhood used by a single dilation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connectivity {
    /// Pixels at (row±1, col) and (row, col±1).
    #[default]
    Four,
    /// Full 3×3 neighborhood.
    Eight,
}

/// One dilation pass with the given neighborhood.
///
/// Out-of-frame neighbors are ignored; nothing wraps around the edges.
pub fn dilate_once(mask: &Frame<bool>, connectivity: Connectivity) -> Frame<bool> {
    let rows = mask.rows();
    let cols = mask.cols();
    let mut output = Frame::new_default(rows, cols);
    if rows == 0 || cols == 0 {
        return output;
    }

    output
        .pixels_mut()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(r, out_row)| {
            let r_min = r.saturating_sub(1);
            let r_max = (r + 1).min(rows - 1);
            for (c, out) in out_row.iter_mut().enumerate() {
                let c_min = c.saturating_sub(1);
                let c_max = (c + 1).min(cols - 1);
                *out = match connectivity {
                    Connectivity::Four => {
                        mask[(r, c)]
                            || mask[(r_min, c)]
                            || mask[(r_max, c)]
                            || mask[(r, c_min)]
                            || mask[(r, c_max)]
                    }
                    Connectivity::Eight => (r_min..=r_max)
                        .any(|rr| mask.row(rr)[c_min..=c_max].iter().any(|&v| v)),
                };
            }
        });

    output
}

/// Grow `mask` by `n` pixels.
///
/// Without diagonal growth the result is `n` cross dilations (a diamond of
/// radius `n`). With diagonal growth the outermost ring is a 3×3 dilation,
/// so only the last pass reaches the corners.
pub fn expand_mask(mask: &Frame<bool>, n: usize, grow_diagonal: bool) -> Frame<bool> {
    if n == 0 {
        return mask.clone();
    }

    let cross_passes = if grow_diagonal { n - 1 } else { n };
    let mut grown = mask.clone();
    for _ in 0..cross_passes {
        grown = dilate_once(&grown, Connectivity::Four);
    }
    if grow_diagonal {
        grown = dilate_once(&grown, Connectivity::Eight);
    }
    grown
}

/// Pixels whose center lies strictly within `radius` of `center = (col, row)`.
pub fn disk_mask(rows: usize, cols: usize, center: (f64, f64), radius: f64) -> Frame<bool> {
    let (cx, cy) = center;
    let r2 = radius * radius;
    let mut mask = Frame::new_default(rows, cols);
    if cols == 0 {
        return mask;
    }
    mask.pixels_mut()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(r, row)| {
            let dy = r as f64 - cy;
            for (c, px) in row.iter_mut().enumerate() {
                let dx = c as f64 - cx;
                *px = dx * dx + dy * dy < r2;
            }
        });
    mask
}
