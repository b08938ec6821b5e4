//! Robust statistics: median, MAD, resistant mean.

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

/// MAD values below this are treated as a degenerate (constant) sample.
const DEGENERATE_MAD: f64 = 1e-24;

#[inline]
pub fn mad_to_sigma(mad: f32) -> f32 {
    mad * MAD_TO_SIGMA
}

/// Median of f32 values in-place (partial sort via quickselect).
///
/// Values must be finite.
#[inline]
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let right = *right_median;
        let left = left_part.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (left + right) * 0.5
    }
}

/// Median of the finite values, or `None` when there are none.
pub fn nan_median(values: &[f32], scratch: &mut Vec<f32>) -> Option<f32> {
    scratch.clear();
    scratch.extend(values.iter().copied().filter(|v| v.is_finite()));
    if scratch.is_empty() {
        return None;
    }
    Some(median_f32_mut(scratch))
}

/// MAD = median(|x_i - median(x)|) using a scratch buffer.
#[inline]
pub fn mad_f32_with_scratch(values: &[f32], median: f32, scratch: &mut Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    scratch.clear();
    scratch.extend(values.iter().map(|&v| (v - median).abs()));
    median_f32_mut(scratch)
}

/// Median and MAD-based σ of the finite values.
pub fn median_and_sigma(values: &[f32], scratch: &mut Vec<f32>) -> Option<(f32, f32)> {
    let median = nan_median(values, scratch)?;
    let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mad = mad_f32_with_scratch(&finite, median, scratch);
    Some((median, mad_to_sigma(mad)))
}

/// Outcome of [`resistant_mean`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResistantMean {
    pub mean: f32,
    pub sigma: f32,
    /// Per-sample flag, true for samples kept by the final cut.
    pub good: Vec<bool>,
}

impl ResistantMean {
    pub fn n_good(&self) -> usize {
        self.good.iter().filter(|&&g| g).count()
    }
}

/// Outlier-resistant mean.
///
/// Samples further than `cut` robust σ from the median are discarded; the
/// σ of the survivors is corrected for the truncation and the cut applied
/// again. Non-finite samples are never kept. Returns `None` if no finite
/// sample exists.
pub fn resistant_mean(values: &[f32], cut: f32) -> Option<ResistantMean> {
    let mut scratch = Vec::with_capacity(values.len());
    let median = nan_median(values, &mut scratch)? as f64;

    let abs_dev: Vec<f64> = values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                (v as f64 - median).abs()
            } else {
                f64::INFINITY
            }
        })
        .collect();

    let finite_dev: Vec<f32> = abs_dev
        .iter()
        .filter(|d| d.is_finite())
        .map(|&d| d as f32)
        .collect();
    let mut dev_scratch = finite_dev.clone();
    let mut spread = median_f32_mut(&mut dev_scratch) as f64 / 0.6745;
    if spread < DEGENERATE_MAD {
        spread = finite_dev.iter().map(|&d| d as f64).sum::<f64>() / finite_dev.len() as f64 / 0.8;
    }

    let cut = cut as f64;
    let mut good: Vec<bool> = abs_dev.iter().map(|&d| d <= cut * spread).collect();
    let (_, first_sigma) = masked_mean_std(values, &good);
    let sigma = first_sigma * truncation_correction(cut);

    good = abs_dev.iter().map(|&d| d <= cut * sigma).collect();
    // Keep the first cut when the corrected σ collapses onto the median.
    if !good.iter().any(|&g| g) {
        good = abs_dev.iter().map(|&d| d <= cut * spread).collect();
    }
    let (mean, final_sigma) = masked_mean_std(values, &good);

    Some(ResistantMean {
        mean: mean as f32,
        sigma: (final_sigma * truncation_correction(cut)) as f32,
        good,
    })
}

/// Bias correction for the σ of a sample truncated at `cut` σ.
fn truncation_correction(cut: f64) -> f64 {
    let sc = cut.max(1.0);
    if sc <= 4.5 {
        1.0 / (-0.15405 + 0.90723 * sc - 0.23584 * sc * sc + 0.020142 * sc * sc * sc)
    } else {
        1.0
    }
}

fn masked_mean_std(values: &[f32], good: &[bool]) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for (&v, &g) in values.iter().zip(good) {
        if g {
            sum += v as f64;
            n += 1;
        }
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = values
        .iter()
        .zip(good)
        .filter(|(_, g)| **g)
        .map(|(&v, _)| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    (mean, var.sqrt())
}

/// Arithmetic mean of the finite values.
pub fn nan_mean(values: &[f32]) -> Option<f32> {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
    (n > 0).then(|| (sum / n as f64) as f32)
}

/// Population variance of the values.
pub fn variance(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
}
