//! Polynomial least squares via normal equations.

/// Pivot magnitude below which a system is considered singular.
const SINGULAR_PIVOT: f64 = 1e-12;

/// Solve a linear system using Gaussian elimination with partial pivoting.
///
/// Returns `None` for a singular system.
#[allow(clippy::needless_range_loop)]
pub fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();

    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b.iter())
        .map(|(row, &bi)| {
            let mut new_row = row.clone();
            new_row.push(bi);
            new_row
        })
        .collect();

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < SINGULAR_PIVOT {
            return None;
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        for row in (col + 1)..n {
            let factor = aug[row][col] / aug[col][col];
            for j in col..=n {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        x[i] = aug[i][n];
        for j in (i + 1)..n {
            x[i] -= aug[i][j] * x[j];
        }
        x[i] /= aug[i][i];
    }

    Some(x)
}

/// Normal matrix `AᵀA` of the Vandermonde design `[1, x, x², …]`.
fn normal_matrix(xs: &[f64], degree: usize) -> Vec<Vec<f64>> {
    let m = degree + 1;
    // Power sums Σ x^k for k = 0..2·degree.
    let mut sums = vec![0.0; 2 * degree + 1];
    for &x in xs {
        let mut p = 1.0;
        for s in sums.iter_mut() {
            *s += p;
            p *= x;
        }
    }
    (0..m)
        .map(|i| (0..m).map(|j| sums[i + j]).collect())
        .collect()
}

/// Fit `y ≈ Σ c_k x^k` and return `c`, or `None` when underdetermined or
/// singular.
pub fn fit_polynomial(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.len() < degree + 1 {
        return None;
    }
    let ata = normal_matrix(xs, degree);
    let mut atb = vec![0.0; degree + 1];
    for (&x, &y) in xs.iter().zip(ys) {
        let mut p = 1.0;
        for v in atb.iter_mut() {
            *v += p * y;
            p *= x;
        }
    }
    solve_linear_system(&ata, &atb)
}

/// Horner evaluation of `Σ c_k x^k`.
#[inline]
pub fn eval_polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Precomputed least-squares projection `(AᵀA)⁻¹Aᵀ` for a fixed abscissa set.
///
/// Abscissae are normalized to `[-1, 1]` before building the design matrix;
/// [`PolyProjection::physical_bias_slope`] maps fitted coefficients back to
/// the original axis. One projection serves every pixel sharing the same
/// samples, so a whole image is fit with one matrix-vector product per pixel.
#[derive(Debug, Clone)]
pub struct PolyProjection {
    degree: usize,
    center: f64,
    half_range: f64,
    /// Row-major `(degree + 1) × n` projection.
    rows: Vec<Vec<f64>>,
    /// Normalized abscissae, kept for residual evaluation.
    xs: Vec<f64>,
}

impl PolyProjection {
    pub fn new(ts: &[f64], degree: usize) -> Option<Self> {
        if ts.len() < degree + 1 {
            return None;
        }
        let t_first = ts.iter().copied().fold(f64::INFINITY, f64::min);
        let t_last = ts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let center = 0.5 * (t_first + t_last);
        let half = 0.5 * (t_last - t_first);
        let half_range = if half > 0.0 { half } else { 1.0 };
        let xs: Vec<f64> = ts.iter().map(|&t| (t - center) / half_range).collect();

        let m = degree + 1;
        let ata = normal_matrix(&xs, degree);

        // Columns of (AᵀA)⁻¹ from unit right-hand sides.
        let mut inv = vec![vec![0.0; m]; m];
        for col in 0..m {
            let mut e = vec![0.0; m];
            e[col] = 1.0;
            let solved = solve_linear_system(&ata, &e)?;
            for (row, v) in solved.into_iter().enumerate() {
                inv[row][col] = v;
            }
        }

        let rows = (0..m)
            .map(|i| {
                xs.iter()
                    .map(|&x| {
                        let mut p = 1.0;
                        let mut acc = 0.0;
                        for inv_ij in &inv[i] {
                            acc += inv_ij * p;
                            p *= x;
                        }
                        acc
                    })
                    .collect()
            })
            .collect();

        Some(Self {
            degree,
            center,
            half_range,
            rows,
            xs,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn n_samples(&self) -> usize {
        self.xs.len()
    }

    /// First and last abscissa covered by the basis.
    pub fn bounds(&self) -> (f64, f64) {
        if self.degree == 0 && self.xs.len() == 1 {
            return (self.center, self.center);
        }
        (
            self.center - self.half_range,
            self.center + self.half_range,
        )
    }

    /// Coefficients in the normalized variable.
    pub fn fit(&self, ys: &[f64]) -> Vec<f64> {
        debug_assert_eq!(ys.len(), self.xs.len());
        self.rows
            .iter()
            .map(|row| row.iter().zip(ys).map(|(p, y)| p * y).sum())
            .collect()
    }

    /// Intercept at t = 0 and first derivative coefficient in physical time.
    pub fn physical_bias_slope(&self, coeffs: &[f64]) -> (f64, f64) {
        // p(t) = Σ k_j u^j with u = (t - a) / b.
        let a = self.center;
        let b = self.half_range;
        let u0 = -a / b;
        let mut bias = 0.0;
        let mut slope = 0.0;
        let mut u_pow = 1.0; // u0^j
        let mut u_pow_prev = 0.0; // u0^(j-1)
        for (j, &k) in coeffs.iter().enumerate() {
            bias += k * u_pow;
            if j > 0 {
                slope += k * j as f64 * u_pow_prev / b;
            }
            u_pow_prev = u_pow;
            u_pow *= u0;
        }
        (bias, slope)
    }

    /// Reduced chi-square of the fit, assuming unit variance per sample.
    ///
    /// Zero when the fit has no degrees of freedom.
    pub fn reduced_chi_square(&self, ys: &[f64], coeffs: &[f64]) -> f64 {
        let dof = self.xs.len().saturating_sub(self.degree + 1);
        if dof == 0 {
            return 0.0;
        }
        let ss: f64 = self
            .xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| (y - eval_polynomial(coeffs, x)).powi(2))
            .sum();
        ss / dof as f64
    }
}
