//! Ramp data cube, exposure metadata and rate products.


use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::common::Frame;
use crate::dq::DqFlags;
use crate::error::{Error, Result};

/// Instrument families handled by the pipeline.
///
/// MIRI follows its own standard-step sequence and skips the custom bias and
/// stripe corrections; the near-infrared detectors share one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Miri,
    Nircam,
    Niriss,
}

impl Instrument {
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_str(name.trim()).map_err(|_| Error::UnsupportedInstrument(name.to_string()))
    }

    pub fn is_miri(self) -> bool {
        self == Instrument::Miri
    }
}

/// Occulter geometry for coronagraphic apertures.
#[derive(Debug, Clone, PartialEq)]
pub struct CoronagraphGeometry {
    /// True on the opaque occulter and neutral-density squares.
    pub occulter: Frame<bool>,
    /// Stellar reference position as `(col, row)` in frame pixels.
    pub star_position: (f64, f64),
}

/// Read-only exposure metadata consumed by the corrections.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureMeta {
    pub instrument: Instrument,
    pub subarray: String,
    pub aperture: String,
    pub ngroups: usize,
    pub nints: usize,
    pub noutputs: usize,
    /// Seconds between consecutive groups.
    pub group_time: f64,
    /// Present when the aperture places a coronagraphic mask in the beam.
    pub coronagraph: Option<CoronagraphGeometry>,
}

impl ExposureMeta {
    pub fn is_full_frame(&self) -> bool {
        self.subarray.to_ascii_uppercase().contains("FULL")
    }

    /// Elapsed time at the end of each group, `(k + 1) * group_time`.
    pub fn group_times(&self) -> Vec<f64> {
        (0..self.ngroups)
            .map(|k| (k + 1) as f64 * self.group_time)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampShape {
    pub nints: usize,
    pub ngroups: usize,
    pub rows: usize,
    pub cols: usize,
}

impl RampShape {
    pub fn new(nints: usize, ngroups: usize, rows: usize, cols: usize) -> Self {
        Self {
            nints,
            ngroups,
            rows,
            cols,
        }
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn integration_len(&self) -> usize {
        self.ngroups * self.frame_len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nints * self.integration_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dims(&self) -> Vec<usize> {
        vec![self.nints, self.ngroups, self.rows, self.cols]
    }
}

/// 4-D ramp `[integration, group, row, col]` with its data-quality arrays.
///
/// The cube is moved through the correction sequence; each correction takes
/// it by value and hands it back.
#[derive(Debug, Clone, PartialEq)]
pub struct RampCube {
    pub meta: ExposureMeta,
    shape: RampShape,
    data: Vec<f32>,
    groupdq: Vec<u32>,
    pixeldq: Frame<u32>,
    zeroframe: Option<Vec<f32>>,
}

impl RampCube {
    pub fn new(
        meta: ExposureMeta,
        shape: RampShape,
        data: Vec<f32>,
        groupdq: Vec<u32>,
        pixeldq: Frame<u32>,
    ) -> Result<Self> {
        if meta.nints != shape.nints || meta.ngroups != shape.ngroups {
            return Err(Error::ShapeMismatch {
                what: "exposure metadata",
                expected: vec![shape.nints, shape.ngroups],
                actual: vec![meta.nints, meta.ngroups],
            });
        }
        if shape.nints == 0 || shape.ngroups == 0 {
            return Err(Error::ShapeMismatch {
                what: "ramp integrations and groups",
                expected: vec![1, 1],
                actual: vec![shape.nints, shape.ngroups],
            });
        }
        if data.len() != shape.len() {
            return Err(Error::ShapeMismatch {
                what: "ramp data",
                expected: shape.dims(),
                actual: vec![data.len()],
            });
        }
        if groupdq.len() != shape.len() {
            return Err(Error::ShapeMismatch {
                what: "group DQ",
                expected: shape.dims(),
                actual: vec![groupdq.len()],
            });
        }
        if pixeldq.shape() != (shape.rows, shape.cols) {
            return Err(Error::ShapeMismatch {
                what: "pixel DQ",
                expected: vec![shape.rows, shape.cols],
                actual: vec![pixeldq.rows(), pixeldq.cols()],
            });
        }
        Ok(Self {
            meta,
            shape,
            data,
            groupdq,
            pixeldq,
            zeroframe: None,
        })
    }

    /// Ramp of zeros with clean DQ.
    pub fn zeros(meta: ExposureMeta, rows: usize, cols: usize) -> Result<Self> {
        let shape = RampShape::new(meta.nints, meta.ngroups, rows, cols);
        let len = shape.len();
        Self::new(
            meta,
            shape,
            vec![0.0; len],
            vec![0; len],
            Frame::new_default(rows, cols),
        )
    }

    /// Attach a zero frame `[integration, row, col]`.
    pub fn with_zeroframe(mut self, zeroframe: Vec<f32>) -> Result<Self> {
        let expected = self.shape.nints * self.shape.frame_len();
        if zeroframe.len() != expected {
            return Err(Error::ShapeMismatch {
                what: "zero frame",
                expected: vec![self.shape.nints, self.shape.rows, self.shape.cols],
                actual: vec![zeroframe.len()],
            });
        }
        self.zeroframe = Some(zeroframe);
        Ok(self)
    }

    #[inline]
    pub fn shape(&self) -> RampShape {
        self.shape
    }

    #[inline]
    fn frame_range(&self, int: usize, group: usize) -> std::ops::Range<usize> {
        assert!(
            int < self.shape.nints && group < self.shape.ngroups,
            "frame ({int}, {group}) out of range"
        );
        let start = int * self.shape.integration_len() + group * self.shape.frame_len();
        start..start + self.shape.frame_len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn groupdq(&self) -> &[u32] {
        &self.groupdq
    }

    pub fn groupdq_mut(&mut self) -> &mut [u32] {
        &mut self.groupdq
    }

    pub fn pixeldq(&self) -> &Frame<u32> {
        &self.pixeldq
    }

    pub fn pixeldq_mut(&mut self) -> &mut Frame<u32> {
        &mut self.pixeldq
    }

    pub fn frame(&self, int: usize, group: usize) -> &[f32] {
        let range = self.frame_range(int, group);
        &self.data[range]
    }

    pub fn frame_mut(&mut self, int: usize, group: usize) -> &mut [f32] {
        let range = self.frame_range(int, group);
        &mut self.data[range]
    }

    /// Owned copy of one group image.
    pub fn frame_copy(&self, int: usize, group: usize) -> Frame<f32> {
        Frame::from_slice(self.shape.rows, self.shape.cols, self.frame(int, group))
    }

    pub fn group_dq(&self, int: usize, group: usize) -> &[u32] {
        let range = self.frame_range(int, group);
        &self.groupdq[range]
    }

    pub fn group_dq_mut(&mut self, int: usize, group: usize) -> &mut [u32] {
        let range = self.frame_range(int, group);
        &mut self.groupdq[range]
    }

    /// All groups of one integration, contiguous `[group, row, col]`.
    pub fn integration(&self, int: usize) -> &[f32] {
        let len = self.shape.integration_len();
        &self.data[int * len..(int + 1) * len]
    }

    pub fn integration_mut(&mut self, int: usize) -> &mut [f32] {
        let len = self.shape.integration_len();
        &mut self.data[int * len..(int + 1) * len]
    }

    pub fn has_zeroframe(&self) -> bool {
        self.zeroframe.is_some()
    }

    pub fn zeroframe(&self, int: usize) -> Option<&[f32]> {
        let len = self.shape.frame_len();
        self.zeroframe
            .as_ref()
            .map(|zf| &zf[int * len..(int + 1) * len])
    }

    pub fn zeroframe_mut(&mut self, int: usize) -> Option<&mut [f32]> {
        let len = self.shape.frame_len();
        self.zeroframe
            .as_mut()
            .map(|zf| &mut zf[int * len..(int + 1) * len])
    }

    /// Pixels whose static DQ carries any bit of `flags`.
    pub fn pixel_flag_mask(&self, flags: DqFlags) -> Frame<bool> {
        self.pixeldq.map(|&dq| flags.is_set_in(dq))
    }

    /// Per-group mask of pixels carrying any bit of `flags` in that group.
    pub fn group_flag_mask(&self, int: usize, group: usize, flags: DqFlags) -> Frame<bool> {
        let dq = self.group_dq(int, group);
        Frame::new(
            self.shape.rows,
            self.shape.cols,
            dq.iter().map(|&d| flags.is_set_in(d)).collect(),
        )
    }

    /// Cumulative bad-pixel masks of one integration.
    ///
    /// Entry `g` is true where any DQ bit was set in groups `0..=g`, so a flag
    /// raised at one group marks the pixel for every later group.
    pub fn cumulative_bad_masks(&self, int: usize) -> Vec<Frame<bool>> {
        let mut masks = Vec::with_capacity(self.shape.ngroups);
        let mut acc = vec![false; self.shape.frame_len()];
        for g in 0..self.shape.ngroups {
            for (a, &dq) in acc.iter_mut().zip(self.group_dq(int, g)) {
                *a |= dq != 0;
            }
            masks.push(Frame::from_slice(self.shape.rows, self.shape.cols, &acc));
        }
        masks
    }
}

/// Slope image with its DQ.
#[derive(Debug, Clone, PartialEq)]
pub struct RateImage {
    pub data: Frame<f32>,
    pub dq: Frame<u32>,
}

impl RateImage {
    pub fn new(data: Frame<f32>) -> Self {
        let dq = Frame::new_default(data.rows(), data.cols());
        Self { data, dq }
    }
}

/// Per-integration rate images.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCube {
    pub integrations: Vec<RateImage>,
}

impl RateCube {
    pub fn nints(&self) -> usize {
        self.integrations.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame<f32>> {
        self.integrations.iter().map(|r| &r.data)
    }
}

/// What a ramp fit hands back: the combined rate and, for multi-integration
/// exposures, the per-integration rates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RateProducts {
    pub rate: Option<RateImage>,
    pub rateints: Option<RateCube>,
}
