//! Numeric backends for the batched linear algebra kernels.
//!
//! Components that hold tensors depend on the [`NumericBackend`] trait instead of
//! a mutable "on accelerator" flag. [`HostBackend`] runs every kernel
//! sequentially; [`AcceleratedBackend`] runs the same kernels data-parallel over
//! walkers and output columns.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::linalg::{to_complex, CMatrix};

/// Selects a backend by name in the configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Host,
    Accelerated,
}

pub trait NumericBackend: fmt::Debug + Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cast a real tensor into the backend's working representation.
    ///
    /// This is a pure, semantics-preserving transform.
    fn cast(&self, m: &DMatrix<f64>) -> CMatrix {
        to_complex(m)
    }

    /// `A · B`.
    fn gemm(&self, a: &CMatrix, b: &CMatrix) -> CMatrix;

    /// `A · B_w` for every matrix of the batch.
    fn gemm_batched_left(&self, a: &CMatrix, bs: &[CMatrix]) -> Vec<CMatrix>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostBackend;

impl NumericBackend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn gemm(&self, a: &CMatrix, b: &CMatrix) -> CMatrix {
        a * b
    }

    fn gemm_batched_left(&self, a: &CMatrix, bs: &[CMatrix]) -> Vec<CMatrix> {
        bs.iter().map(|b| a * b).collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceleratedBackend;

impl NumericBackend for AcceleratedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn gemm(&self, a: &CMatrix, b: &CMatrix) -> CMatrix {
        let columns: Vec<_> = (0..b.ncols())
            .into_par_iter()
            .map(|j| a * b.column(j))
            .collect();
        if columns.is_empty() {
            return CMatrix::zeros(a.nrows(), 0);
        }
        CMatrix::from_columns(&columns)
    }

    fn gemm_batched_left(&self, a: &CMatrix, bs: &[CMatrix]) -> Vec<CMatrix> {
        bs.par_iter().map(|b| a * b).collect()
    }
}

/// Instantiate the backend selected by `kind`.
pub fn backend_for(kind: BackendKind) -> Arc<dyn NumericBackend> {
    match kind {
        BackendKind::Host => Arc::new(HostBackend),
        BackendKind::Accelerated => Arc::new(AcceleratedBackend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn sample(rows: usize, cols: usize, shift: f64) -> CMatrix {
        CMatrix::from_fn(rows, cols, |i, j| {
            Complex64::new((i as f64 + shift).sin(), (j as f64 - shift).cos())
        })
    }

    #[test]
    fn test_accelerated_kernels_match_host() {
        let a = sample(7, 4, 0.3);
        let bs: Vec<_> = (0..5).map(|k| sample(4, 3, k as f64)).collect();
        let host = HostBackend.gemm_batched_left(&a, &bs);
        let accel = AcceleratedBackend.gemm_batched_left(&a, &bs);
        for (h, g) in host.iter().zip(accel.iter()) {
            for (x, y) in h.iter().zip(g.iter()) {
                assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
                assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
            }
        }
        let h = HostBackend.gemm(&a, &bs[0]);
        let g = AcceleratedBackend.gemm(&a, &bs[0]);
        assert_eq!(h.shape(), g.shape());
        for (x, y) in h.iter().zip(g.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_backend_kind_parses_from_yaml() {
        let kind: BackendKind = serde_yaml::from_str("accelerated").unwrap();
        assert_eq!(kind, BackendKind::Accelerated);
        assert_eq!(backend_for(kind).kind(), BackendKind::Accelerated);
    }
}
