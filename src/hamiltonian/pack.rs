//! Packed storage of symmetric Cholesky vectors.

use nalgebra::DMatrix;

use crate::linalg::{packed_index, packed_len};

/// Pack an `(M², nchol)` factor into its `(M(M+1)/2, nchol)` upper triangle.
///
/// Rows of the result follow `(0,0), (0,1), …, (0,M-1), (1,1), …`.
pub fn pack_cholesky(chol: &DMatrix<f64>, m: usize) -> DMatrix<f64> {
    let nchol = chol.ncols();
    let mut packed = DMatrix::zeros(packed_len(m), nchol);
    for n in 0..nchol {
        for i in 0..m {
            for j in i..m {
                packed[(packed_index(i, j, m), n)] = chol[(i * m + j, n)];
            }
        }
    }
    packed
}

/// Inverse of [`pack_cholesky`].
pub fn unpack_cholesky(packed: &DMatrix<f64>, m: usize) -> DMatrix<f64> {
    let nchol = packed.ncols();
    let mut chol = DMatrix::zeros(m * m, nchol);
    for n in 0..nchol {
        for i in 0..m {
            for j in i..m {
                let v = packed[(packed_index(i, j, m), n)];
                chol[(i * m + j, n)] = v;
                chol[(j * m + i, n)] = v;
            }
        }
    }
    chol
}

/// Largest deviation from symmetry over every Cholesky vector.
pub(crate) fn asymmetry(chol: &DMatrix<f64>, m: usize) -> f64 {
    let mut worst: f64 = 0.0;
    for n in 0..chol.ncols() {
        for i in 0..m {
            for j in (i + 1)..m {
                worst = worst.max((chol[(i * m + j, n)] - chol[(j * m + i, n)]).abs());
            }
        }
    }
    worst
}
