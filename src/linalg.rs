//! Dense linear algebra helpers shared by the propagator and the estimators.
//!
//! Everything is built on `nalgebra` dense matrices with `Complex64` entries.
//! Cholesky vectors are real symmetric, walkers and trial orbitals are complex.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

pub type CMatrix = DMatrix<Complex64>;
pub type CVector = DVector<Complex64>;

pub const ZERO: Complex64 = Complex64 { re: 0.0, im: 0.0 };
pub const ONE: Complex64 = Complex64 { re: 1.0, im: 0.0 };
pub const I: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Promote a real matrix to a complex one.
pub fn to_complex(m: &DMatrix<f64>) -> CMatrix {
    m.map(|x| Complex64::new(x, 0.0))
}

/// Number of elements in the upper triangle (diagonal included) of an `m × m` matrix.
#[inline]
pub fn packed_len(m: usize) -> usize {
    m * (m + 1) / 2
}

/// Position of element `(i, j)` with `i <= j` in the row-major upper triangle.
#[inline]
pub fn packed_index(i: usize, j: usize, m: usize) -> usize {
    let (i, j) = if i <= j { (i, j) } else { (j, i) };
    // rows 0..i hold m, m-1, ..., m-i+1 elements
    i * m - i * i.saturating_sub(1) / 2 + (j - i)
}

/// Rebuild a dense symmetric matrix from its packed upper triangle.
pub fn unpack_symmetric(packed: impl Iterator<Item = Complex64>, m: usize) -> CMatrix {
    let mut out = CMatrix::zeros(m, m);
    let mut values = packed;
    for i in 0..m {
        for j in i..m {
            let v = values.next().unwrap_or(ZERO);
            out[(i, j)] = v;
            out[(j, i)] = v;
        }
    }
    out
}

/// Apply `exp(V)` to `phi` using a truncated Taylor series.
pub fn apply_exponential(v: &CMatrix, phi: &CMatrix, order: usize) -> CMatrix {
    let mut result = phi.clone();
    let mut term = phi.clone();
    for k in 1..=order {
        term = (v * &term) / Complex64::new(k as f64, 0.0);
        result += &term;
    }
    result
}

/// Determinant and inverse of a square overlap matrix.
///
/// The inverse is `None` when the matrix is numerically singular, in which case
/// the returned determinant is zero.
pub fn det_and_inverse(s: &CMatrix) -> (Complex64, Option<CMatrix>) {
    if s.nrows() == 0 {
        return (ONE, Some(CMatrix::zeros(0, 0)));
    }
    let lu = s.clone().lu();
    let det = lu.determinant();
    if !det.is_finite() || det.norm() == 0.0 {
        return (ZERO, None);
    }
    match lu.try_inverse() {
        Some(inv) => (det, Some(inv)),
        None => (ZERO, None),
    }
}

/// Thin QR factorisation `phi = Q R`, returning `Q` and `det R`.
pub fn orthonormalise(phi: &CMatrix) -> (CMatrix, Complex64) {
    if phi.ncols() == 0 {
        return (phi.clone(), ONE);
    }
    let qr = phi.clone().qr();
    let r = qr.r();
    let det_r = r.diagonal().iter().fold(ONE, |acc, &d| acc * d);
    (qr.q(), det_r)
}

/// Sum of the diagonal of the `n × n` block starting at row `row0` of a tall matrix.
#[inline]
pub fn block_trace(t: &CMatrix, row0: usize, n: usize) -> Complex64 {
    (0..n).fold(ZERO, |acc, i| acc + t[(row0 + i, i)])
}

/// `Tr(B B)` for the `n × n` block starting at row `row0` of a tall matrix.
#[inline]
pub fn block_square_trace(t: &CMatrix, row0: usize, n: usize) -> Complex64 {
    let mut acc = ZERO;
    for i in 0..n {
        for j in 0..n {
            acc += t[(row0 + i, j)] * t[(row0 + j, i)];
        }
    }
    acc
}

/// Flatten complex values into interleaved `(re, im)` pairs for the communicator.
pub fn flatten_complex(values: &[Complex64]) -> Vec<f64> {
    values.iter().flat_map(|z| [z.re, z.im]).collect()
}

/// Inverse of [`flatten_complex`].
pub fn unflatten_complex(values: &[f64]) -> Vec<Complex64> {
    values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect()
}
