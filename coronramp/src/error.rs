//! Error types for ramp corrections.

use thiserror::Error;

/// Errors raised by the correction algorithms themselves.
///
/// Failures of external collaborators (standard steps, reference lookups)
/// are carried as `anyhow::Error` with context by the pipeline instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported instrument '{0}'")]
    UnsupportedInstrument(String),

    #[error("{kind} data must have {expected} output channel(s), got {actual}")]
    OutputChannelMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Frame width {cols} is not divisible into {noutputs} readout channels")]
    ChannelWidth { cols: usize, noutputs: usize },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Ramp has {ngroups} group(s); at least {required} needed")]
    TooFewGroups { ngroups: usize, required: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
