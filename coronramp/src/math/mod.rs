//! Numerical helpers shared by the corrections.

pub mod lsq;
pub mod statistics;


pub use lsq::{PolyProjection, eval_polynomial, fit_polynomial, solve_linear_system};
pub use statistics::{
    MAD_TO_SIGMA, ResistantMean, mad_f32_with_scratch, mad_to_sigma, median_and_sigma,
    median_f32_mut, nan_mean, nan_median, resistant_mean, variance,
};
