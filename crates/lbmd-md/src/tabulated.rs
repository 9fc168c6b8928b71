//! Tabulated functions with piecewise polynomial interpolation.
//!
//! Each interval `[x_i, x_{i+1}]` stores cubic coefficients in `t = x - x_i`,
//! so value and derivative come from the same polynomial and a tabulated force
//! is the exact negative gradient of the tabulated energy.

use crate::{MdError, Result};
use serde::{Deserialize, Serialize};

/// Interpolation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Linear,
    Akima,
    CubicSpline,
}

impl Interpolation {
    /// Minimum number of samples the scheme needs.
    pub fn min_points(self) -> usize {
        match self {
            Interpolation::Linear => 2,
            Interpolation::CubicSpline => 3,
            Interpolation::Akima => 5,
        }
    }
}

/// Serialised form: the raw samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct TableSamples {
    order: Interpolation,
    x: Vec<f64>,
    y: Vec<f64>,
}

/// A sampled function `y(x)` with an interpolating polynomial per interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableSamples", into = "TableSamples")]
pub struct TabulatedFunction {
    order: Interpolation,
    x: Vec<f64>,
    y: Vec<f64>,
    /// `[a, b, c, d]` for `a + b t + c t² + d t³` per interval.
    coeffs: Vec<[f64; 4]>,
}

impl TryFrom<TableSamples> for TabulatedFunction {
    type Error = MdError;

    fn try_from(s: TableSamples) -> Result<Self> {
        Self::new(s.order, s.x, s.y)
    }
}

impl From<TabulatedFunction> for TableSamples {
    fn from(t: TabulatedFunction) -> Self {
        Self {
            order: t.order,
            x: t.x,
            y: t.y,
        }
    }
}

impl TabulatedFunction {
    /// Build an interpolant from samples.
    ///
    /// `x` must be strictly increasing and every sample finite.
    pub fn new(order: Interpolation, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(MdError::InvalidTable(format!(
                "{} abscissae but {} values",
                x.len(),
                y.len()
            )));
        }
        if x.len() < order.min_points() {
            return Err(MdError::InvalidTable(format!(
                "{order:?} interpolation needs at least {} points, got {}",
                order.min_points(),
                x.len()
            )));
        }
        if let Some(i) = x.iter().chain(&y).position(|v| !v.is_finite()) {
            return Err(MdError::InvalidTable(format!("non-finite sample at index {}", i % x.len())));
        }
        if let Some(i) = x.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MdError::InvalidTable(format!(
                "abscissae not strictly increasing at index {}",
                i + 1
            )));
        }

        let coeffs = match order {
            Interpolation::Linear => linear(&x, &y),
            Interpolation::CubicSpline => natural_spline(&x, &y),
            Interpolation::Akima => akima(&x, &y),
        };
        Ok(Self { order, x, y, coeffs })
    }

    /// Sample `f` at the given abscissae.
    pub fn from_fn<F: Fn(f64) -> f64>(order: Interpolation, x: Vec<f64>, f: F) -> Result<Self> {
        let y = x.iter().map(|&xi| f(xi)).collect();
        Self::new(order, x, y)
    }

    pub fn order(&self) -> Interpolation {
        self.order
    }

    /// Smallest tabulated abscissa.
    pub fn x_min(&self) -> f64 {
        self.x[0]
    }

    /// Largest tabulated abscissa.
    pub fn x_max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    /// Interpolated value. Outside the table the end polynomials are extended.
    pub fn value(&self, x: f64) -> f64 {
        self.value_and_derivative(x).0
    }

    /// Derivative of the interpolant.
    pub fn derivative(&self, x: f64) -> f64 {
        self.value_and_derivative(x).1
    }

    /// Value and derivative in one lookup.
    pub fn value_and_derivative(&self, x: f64) -> (f64, f64) {
        let n = self.x.len();
        let i = self
            .x
            .partition_point(|&xi| xi <= x)
            .saturating_sub(1)
            .min(n - 2);
        let [a, b, c, d] = self.coeffs[i];
        let t = x - self.x[i];
        let dv = b + t * (2.0 * c + 3.0 * d * t);
        if x == self.x[n - 1] {
            return (self.y[n - 1], dv);
        }
        (a + t * (b + t * (c + t * d)), dv)
    }
}

fn linear(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| [ys[0], (ys[1] - ys[0]) / (xs[1] - xs[0]), 0.0, 0.0])
        .collect()
}

/// Natural cubic spline: second derivative zero at both ends.
fn natural_spline(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let slope: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    // Tridiagonal system for the interior second derivatives (Thomas algorithm).
    let m = n - 2;
    let mut diag = vec![0.0; m];
    let mut rhs = vec![0.0; m];
    for k in 0..m {
        diag[k] = 2.0 * (h[k] + h[k + 1]);
        rhs[k] = 6.0 * (slope[k + 1] - slope[k]);
    }
    for k in 1..m {
        let w = h[k] / diag[k - 1];
        diag[k] -= w * h[k];
        rhs[k] -= w * rhs[k - 1];
    }
    let mut second = vec![0.0; n];
    for k in (0..m).rev() {
        let upper = if k + 1 < m { h[k + 1] * second[k + 2] } else { 0.0 };
        second[k + 1] = (rhs[k] - upper) / diag[k];
    }

    (0..n - 1)
        .map(|i| {
            [
                y[i],
                slope[i] - h[i] * (2.0 * second[i] + second[i + 1]) / 6.0,
                0.5 * second[i],
                (second[i + 1] - second[i]) / (6.0 * h[i]),
            ]
        })
        .collect()
}

/// Akima spline: local, outlier-resistant node derivatives with Hermite segments.
fn akima(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    // Segment slopes padded with two extrapolated slopes at each end;
    // m[k + 2] is the slope of interval k.
    let mut m = vec![0.0; n + 3];
    for i in 0..n - 1 {
        m[i + 2] = (y[i + 1] - y[i]) / h[i];
    }
    m[1] = 2.0 * m[2] - m[3];
    m[0] = 2.0 * m[1] - m[2];
    m[n + 1] = 2.0 * m[n] - m[n - 1];
    m[n + 2] = 2.0 * m[n + 1] - m[n];

    let t: Vec<f64> = (0..n)
        .map(|i| {
            let (m_2, m_1, m0, m1) = (m[i], m[i + 1], m[i + 2], m[i + 3]);
            let w1 = (m1 - m0).abs();
            let w2 = (m_1 - m_2).abs();
            if w1 + w2 <= f64::EPSILON * (m_1.abs() + m0.abs()).max(1.0) {
                0.5 * (m_1 + m0)
            } else {
                (w1 * m_1 + w2 * m0) / (w1 + w2)
            }
        })
        .collect();

    (0..n - 1)
        .map(|i| {
            let s = m[i + 2];
            [
                y[i],
                t[i],
                (3.0 * s - 2.0 * t[i] - t[i + 1]) / h[i],
                (t[i] + t[i + 1] - 2.0 * s) / (h[i] * h[i]),
            ]
        })
        .collect()
}
