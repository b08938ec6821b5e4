//! Testing utilities for coronramp.

#![allow(dead_code)]

pub mod mocks;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::Frame;
use crate::ramp::{ExposureMeta, Instrument, RampCube, RampShape};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Seeded generator for reproducible synthetic data.
pub struct TestRng(StdRng);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.0.random::<f64>()
    }

    /// Standard normal sample (Box-Muller).
    pub fn next_gaussian_f32(&mut self) -> f32 {
        let u1 = self.next_f64().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64();
        ((-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()) as f32
    }
}

/// Add deterministic Gaussian noise to a pixel slice.
pub fn add_gaussian_noise(pixels: &mut [f32], sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    for p in pixels.iter_mut() {
        *p += rng.next_gaussian_f32() * sigma;
    }
}

/// Subarray exposure metadata with one output and 1 s groups.
pub fn subarray_meta(instrument: Instrument, nints: usize, ngroups: usize) -> ExposureMeta {
    ExposureMeta {
        instrument,
        subarray: "SUB320A335R".to_string(),
        aperture: "NRCA5_MASK335R".to_string(),
        ngroups,
        nints,
        noutputs: 1,
        group_time: 1.0,
        coronagraph: None,
    }
}

/// Noise-free ramp `bias + slope * t_k` in every pixel of every integration.
pub fn linear_ramp(
    meta: ExposureMeta,
    rows: usize,
    cols: usize,
    bias: f32,
    slope: f32,
) -> RampCube {
    let shape = RampShape::new(meta.nints, meta.ngroups, rows, cols);
    let times = meta.group_times();
    let mut data = Vec::with_capacity(shape.len());
    for _ in 0..shape.nints {
        for &t in &times {
            let value = bias + slope * t as f32;
            data.extend(std::iter::repeat(value).take(shape.frame_len()));
        }
    }
    RampCube::new(
        meta,
        shape,
        data,
        vec![0; shape.len()],
        Frame::new_default(rows, cols),
    )
    .expect("synthetic ramp shape is consistent")
}
