//! 1/f stripe noise removal.
//!
//! Readout electronics add a low-frequency offset that is constant along the
//! fast-read direction and varies from row to row, so every group frame
//! shows horizontal stripes. Each readout channel is modeled on its own from
//! pixels free of astrophysical signal and bad-pixel flags, and the model is
//! subtracted from the whole channel.

pub mod savgol;


use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

use crate::common::Frame;
use crate::error::{Error, Result};
use crate::mask::{disk_mask, expand_mask};
use crate::math::{nan_median, resistant_mean};
use crate::ramp::{CoronagraphGeometry, ExposureMeta, RampCube};
use crate::slope_fit::ExposureSlopes;

pub use savgol::SavgolConfig;

/// Rejection threshold of the per-row resistant mean.
pub const MEAN_CUT: f32 = 3.0;

/// Cut (in σ) separating signal from background in the mean slope image.
pub const SIGNAL_CUT: f32 = 2.0;

/// Growth applied to the occulter before it is excluded.
pub const OCCULTER_GROWTH: usize = 10;

/// Upper bound on the excluded radius around the star, in pixels.
pub const MAX_STAR_RADIUS: f64 = 50.0;

/// Per-row stripe estimator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FnoiseModel {
    /// Median of the eligible pixels.
    Median,
    /// Resistant mean of the eligible pixels.
    Mean,
    /// Smooth local-polynomial model with sigma rejection.
    #[default]
    Savgol,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FnoiseConfig {
    pub model: FnoiseModel,
    pub savgol: SavgolConfig,
}

impl FnoiseConfig {
    pub fn with_model(mut self, model: FnoiseModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_savgol(mut self, savgol: SavgolConfig) -> Self {
        self.savgol = savgol;
        self
    }
}

/// Column split of a frame into equally wide readout channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPartition {
    cols: usize,
    noutputs: usize,
}

impl ChannelPartition {
    pub fn new(cols: usize, noutputs: usize) -> Result<Self> {
        if noutputs == 0 || cols % noutputs != 0 {
            return Err(Error::ChannelWidth { cols, noutputs });
        }
        Ok(Self { cols, noutputs })
    }

    /// Full-frame data is read through 4 outputs, subarrays through 1.
    pub fn for_exposure(meta: &ExposureMeta, cols: usize) -> Result<Self> {
        let (kind, expected) = if meta.is_full_frame() {
            ("Full frame", 4)
        } else {
            ("Subarray", 1)
        };
        if meta.noutputs != expected {
            return Err(Error::OutputChannelMismatch {
                kind,
                expected,
                actual: meta.noutputs,
            });
        }
        Self::new(cols, meta.noutputs)
    }

    pub fn noutputs(&self) -> usize {
        self.noutputs
    }

    pub fn channel_size(&self) -> usize {
        self.cols / self.noutputs
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let size = self.channel_size();
        (0..self.noutputs).map(move |ch| ch * size..(ch + 1) * size)
    }
}

/// Stripe model of one channel image.
///
/// Rows without eligible pixels model to zero.
pub fn model_stripes(
    image: &Frame<f32>,
    eligible: &Frame<bool>,
    config: &FnoiseConfig,
) -> Frame<f32> {
    assert!(image.same_shape(eligible), "image and mask shape mismatch");
    let cols = image.cols();
    let mut model = Frame::new_default(image.rows(), cols);
    if cols == 0 {
        return model;
    }

    model
        .pixels_mut()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(r, out)| {
            let values = image.row(r);
            let mask = eligible.row(r);
            match config.model {
                FnoiseModel::Median | FnoiseModel::Mean => {
                    let samples: Vec<f32> = values
                        .iter()
                        .zip(mask)
                        .filter_map(|(&v, &m)| m.then_some(v))
                        .collect();
                    let level = if config.model == FnoiseModel::Median {
                        let mut scratch = Vec::with_capacity(samples.len());
                        nan_median(&samples, &mut scratch)
                    } else {
                        resistant_mean(&samples, MEAN_CUT).map(|rm| rm.mean)
                    };
                    out.fill(level.unwrap_or(0.0));
                }
                FnoiseModel::Savgol => {
                    out.copy_from_slice(&savgol::smooth_row(values, mask, &config.savgol));
                }
            }
        });

    model
}

/// Model and subtract stripes channel by channel.
pub fn clean_frame(
    frame: &mut Frame<f32>,
    eligible: &Frame<bool>,
    partition: &ChannelPartition,
    config: &FnoiseConfig,
) {
    assert!(frame.same_shape(eligible), "frame and mask shape mismatch");
    assert_eq!(frame.cols(), partition.cols, "partition width mismatch");
    for range in partition.ranges() {
        let image = frame.column_block(range.clone());
        let mask = eligible.column_block(range.clone());
        let model = model_stripes(&image, &mask, config);
        for r in 0..frame.rows() {
            for (v, &m) in frame.row_mut(r)[range.clone()].iter_mut().zip(model.row(r)) {
                *v -= m;
            }
        }
    }
}

/// True where a pixel is free of astrophysical signal.
///
/// Slopes are combined across integrations with a resistant mean. Each row of
/// each readout channel then has its median removed, so stripe offsets that
/// leak into the fitted slopes are not taken for signal. Pixels further than
/// [`SIGNAL_CUT`] σ from the image level count as signal, and the signal
/// region is grown by one pixel including diagonals.
///
/// # Panics
/// Panics if `slopes` holds no integration or the partition width differs
/// from the slope frames.
pub fn signal_free_mask(slopes: &ExposureSlopes, partition: &ChannelPartition) -> Frame<bool> {
    assert!(slopes.nints() > 0, "signal mask needs at least one integration");
    let (rows, cols) = slopes.slope(0).shape();
    assert_eq!(cols, partition.cols, "partition width mismatch");

    let per_int: Vec<&[f32]> = slopes
        .integrations
        .iter()
        .map(|fit| fit.slope.pixels())
        .collect();
    let mut mean_slope: Vec<f32> = (0..rows * cols)
        .into_par_iter()
        .map(|p| {
            let samples: Vec<f32> = per_int.iter().map(|s| s[p]).collect();
            resistant_mean(&samples, MEAN_CUT).map_or(f32::NAN, |rm| rm.mean)
        })
        .collect();

    if cols > 0 {
        let ranges: Vec<Range<usize>> = partition.ranges().collect();
        mean_slope.par_chunks_mut(cols).for_each(|row| {
            let mut scratch = Vec::new();
            for range in &ranges {
                let segment = &mut row[range.clone()];
                if let Some(level) = nan_median(segment, &mut scratch) {
                    segment.iter_mut().for_each(|v| *v -= level);
                }
            }
        });
    }

    let good = match resistant_mean(&mean_slope, SIGNAL_CUT) {
        Some(rm) => Frame::new(rows, cols, rm.good),
        None => Frame::new_default(rows, cols),
    };
    expand_mask(&good.not(), 1, true).not()
}

/// Occulter grown by [`OCCULTER_GROWTH`] plus a disk around the star.
pub fn coronagraph_exclusion(geometry: &CoronagraphGeometry, channel_size: usize) -> Frame<bool> {
    let (rows, cols) = geometry.occulter.shape();
    let mut exclusion = expand_mask(&geometry.occulter, OCCULTER_GROWTH, true);
    let radius = MAX_STAR_RADIUS.min(channel_size as f64 / 5.0);
    exclusion.or_assign(&disk_mask(rows, cols, geometry.star_position, radius));
    exclusion
}

/// Remove 1/f stripes from every group of every integration.
///
/// `slopes` must be a fresh fit of `ramp`; they define which pixels carry
/// signal. Pixels flagged in the group DQ up to a group are not used to
/// model that group.
pub fn subtract_fnoise(
    mut ramp: RampCube,
    slopes: &ExposureSlopes,
    config: &FnoiseConfig,
) -> Result<RampCube> {
    if config.model == FnoiseModel::Savgol {
        config.savgol.validate()?;
    }
    let shape = ramp.shape();
    let partition = ChannelPartition::for_exposure(&ramp.meta, shape.cols)?;

    if slopes.nints() != shape.nints
        || slopes
            .integrations
            .iter()
            .any(|fit| fit.slope.shape() != (shape.rows, shape.cols))
    {
        return Err(Error::ShapeMismatch {
            what: "slope cube",
            expected: vec![shape.nints, shape.rows, shape.cols],
            actual: vec![slopes.nints()],
        });
    }

    let mut mask = signal_free_mask(slopes, &partition);
    if let Some(geometry) = &ramp.meta.coronagraph {
        if geometry.occulter.shape() != (shape.rows, shape.cols) {
            return Err(Error::ShapeMismatch {
                what: "occulter mask",
                expected: vec![shape.rows, shape.cols],
                actual: vec![geometry.occulter.rows(), geometry.occulter.cols()],
            });
        }
        mask.and_not_assign(&coronagraph_exclusion(geometry, partition.channel_size()));
    }

    info!(
        model = %config.model,
        channels = partition.noutputs(),
        eligible = mask.count_true(),
        pixels = shape.frame_len(),
        "Removing 1/f noise"
    );

    for int in 0..shape.nints {
        let bad = ramp.cumulative_bad_masks(int);
        for (group, bad_group) in bad.iter().enumerate() {
            let mut eligible = mask.clone();
            eligible.and_not_assign(bad_group);
            let mut frame = ramp.frame_copy(int, group);
            clean_frame(&mut frame, &eligible, &partition, config);
            ramp.frame_mut(int, group).copy_from_slice(frame.pixels());
        }
        debug!(integration = int, "1/f noise removed");
    }

    Ok(ramp)
}
