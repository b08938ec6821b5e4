//! In-memory collaborators for pipeline tests.

use std::cell::Cell;

use anyhow::bail;

use crate::common::Frame;
use crate::dq::{DqFlags, or_flags_where};
use crate::mask::expand_mask;
use crate::outliers::CubeOutlierDetector;
use crate::pipeline::{
    ProductSink, RampFitParams, ReferenceKind, ReferenceLookup, StandardStep, StepKind, StepOutput,
    StepRunner,
};
use crate::ramp::{ExposureMeta, RampCube, RateCube, RateImage, RateProducts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCall {
    Step(StandardStep),
    RampFit,
    GainScaleRate,
    GainScaleRateints,
}

/// Step runner that records calls and applies minimal stand-in behavior.
///
/// The saturation step flags groups at or above `saturation_level` and grows
/// them like the standard step. Ramp fits return the end-point slope of every
/// pixel, per integration; `rateints` is produced only for multi-integration
/// exposures.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    pub calls: Vec<RunnerCall>,
    pub saturation_level: Option<f32>,
    /// Pixel DQ as seen by the reference-pixel step.
    pub refpix_pixeldq: Option<Frame<u32>>,
    /// Group DQ as seen by each ramp fit.
    pub fitted_groupdq: Vec<Vec<u32>>,
    pub report_scale_skipped: bool,
    pub fail_on: Option<StepKind>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_saturation_level(mut self, level: f32) -> Self {
        self.saturation_level = Some(level);
        self
    }

    pub fn failing_on(mut self, kind: StepKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                RunnerCall::Step(step) => Some(step.kind()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: RunnerCall) -> usize {
        self.calls.iter().filter(|&&call| call == wanted).count()
    }

    fn saturate(&self, ramp: &mut RampCube, n_pix_grow_sat: usize, grow_diagonal: bool) {
        let Some(level) = self.saturation_level else {
            return;
        };
        let shape = ramp.shape();
        for int in 0..shape.nints {
            for group in 0..shape.ngroups {
                let mask = Frame::new(
                    shape.rows,
                    shape.cols,
                    ramp.frame(int, group).iter().map(|&v| v >= level).collect(),
                );
                let grown = expand_mask(&mask, n_pix_grow_sat, grow_diagonal);
                or_flags_where(ramp.group_dq_mut(int, group), grown.pixels(), DqFlags::SATURATED);
            }
        }
    }
}

fn endpoint_rates(ramp: &RampCube) -> Vec<RateImage> {
    let shape = ramp.shape();
    let span = (shape.ngroups.max(2) - 1) as f32 * ramp.meta.group_time as f32;
    (0..shape.nints)
        .map(|int| {
            let first = ramp.frame(int, 0);
            let last = ramp.frame(int, shape.ngroups - 1);
            let data = first.iter().zip(last).map(|(&a, &b)| (b - a) / span).collect();
            RateImage::new(Frame::new(shape.rows, shape.cols, data))
        })
        .collect()
}

impl StepRunner for RecordingRunner {
    fn run_ramp_step(
        &mut self,
        step: StandardStep,
        mut ramp: RampCube,
    ) -> anyhow::Result<StepOutput<RampCube>> {
        self.calls.push(RunnerCall::Step(step));
        if self.fail_on == Some(step.kind()) {
            bail!("{} exploded", step.kind());
        }
        match step {
            StandardStep::Saturation {
                n_pix_grow_sat,
                grow_diagonal,
            } => self.saturate(&mut ramp, n_pix_grow_sat, grow_diagonal),
            StandardStep::RefPix { .. } => self.refpix_pixeldq = Some(ramp.pixeldq().clone()),
            StandardStep::GroupScale if self.report_scale_skipped => {
                return Ok(StepOutput::skipped(ramp));
            }
            _ => {}
        }
        Ok(StepOutput::ran(ramp))
    }

    fn ramp_fit(
        &mut self,
        ramp: &RampCube,
        _params: &RampFitParams,
    ) -> anyhow::Result<StepOutput<RateProducts>> {
        self.calls.push(RunnerCall::RampFit);
        self.fitted_groupdq.push(ramp.groupdq().to_vec());
        let integrations = endpoint_rates(ramp);
        let shape = ramp.shape();
        let mut mean = Frame::new_default(shape.rows, shape.cols);
        for rate in &integrations {
            for (m, &v) in mean.iter_mut().zip(rate.data.pixels()) {
                *m += v / integrations.len() as f32;
            }
        }
        let rateints = (shape.nints > 1).then_some(RateCube { integrations });
        Ok(StepOutput::ran(RateProducts {
            rate: Some(RateImage::new(mean)),
            rateints,
        }))
    }

    fn gain_scale_rate(&mut self, rate: RateImage) -> anyhow::Result<StepOutput<RateImage>> {
        self.calls.push(RunnerCall::GainScaleRate);
        if self.report_scale_skipped {
            return Ok(StepOutput::skipped(rate));
        }
        Ok(StepOutput::ran(rate))
    }

    fn gain_scale_rateints(&mut self, rateints: RateCube) -> anyhow::Result<StepOutput<RateCube>> {
        self.calls.push(RunnerCall::GainScaleRateints);
        Ok(StepOutput::ran(rateints))
    }
}

/// Reference lookup returning one constant frame and counting calls.
#[derive(Debug)]
pub struct ConstantReference {
    pub value: f32,
    pub rows: usize,
    pub cols: usize,
    pub calls: usize,
}

impl ConstantReference {
    pub fn new(value: f32, rows: usize, cols: usize) -> Self {
        Self {
            value,
            rows,
            cols,
            calls: 0,
        }
    }
}

impl ReferenceLookup for ConstantReference {
    fn get_reference(
        &mut self,
        _meta: &ExposureMeta,
        _kind: ReferenceKind,
    ) -> anyhow::Result<Frame<f32>> {
        self.calls += 1;
        Ok(Frame::new_filled(self.rows, self.cols, self.value))
    }
}

/// Reference lookup that always fails.
#[derive(Debug, Default)]
pub struct MissingReference;

impl ReferenceLookup for MissingReference {
    fn get_reference(
        &mut self,
        meta: &ExposureMeta,
        kind: ReferenceKind,
    ) -> anyhow::Result<Frame<f32>> {
        bail!("no {kind} reference for {}", meta.subarray)
    }
}

/// Sink recording the suffix of every saved product.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub ramps: Vec<String>,
    pub rates: Vec<String>,
    pub rateints: Vec<String>,
}

impl ProductSink for MemorySink {
    fn save_ramp(&mut self, _ramp: &RampCube, suffix: &str) -> anyhow::Result<()> {
        self.ramps.push(suffix.to_string());
        Ok(())
    }

    fn save_rate(&mut self, _rate: &RateImage, suffix: &str) -> anyhow::Result<()> {
        self.rates.push(suffix.to_string());
        Ok(())
    }

    fn save_rateints(&mut self, _rateints: &RateCube, suffix: &str) -> anyhow::Result<()> {
        self.rateints.push(suffix.to_string());
        Ok(())
    }
}

/// Detector flagging a fixed set of `(frame, row, col)` samples.
#[derive(Debug, Default)]
pub struct FixedOutliers {
    pub hits: Vec<(usize, usize, usize)>,
    pub calls: Cell<usize>,
    pub frames_seen: Cell<usize>,
}

impl FixedOutliers {
    pub fn new(hits: Vec<(usize, usize, usize)>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }
}

impl CubeOutlierDetector for FixedOutliers {
    fn detect(
        &self,
        frames: &[&Frame<f32>],
        _sigma_cut: f32,
        nint_min: usize,
    ) -> anyhow::Result<Vec<Frame<bool>>> {
        self.calls.set(self.calls.get() + 1);
        self.frames_seen.set(frames.len());
        let mut masks: Vec<Frame<bool>> = frames
            .iter()
            .map(|f| Frame::new_default(f.rows(), f.cols()))
            .collect();
        if frames.len() >= nint_min {
            for &(i, r, c) in &self.hits {
                if let Some(mask) = masks.get_mut(i) {
                    mask[(r, c)] = true;
                }
            }
        }
        Ok(masks)
    }
}
