//! Generic ab initio Hamiltonian in the Cholesky representation.
//!
//! The two-body interaction is stored as a low rank factor `L` of shape
//! `(M², nchol)` with row index `p * M + q`, together with its packed upper
//! triangle. Chunking hands each group member a contiguous block of vectors.

mod chunk;
mod pack;

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::DMatrix;
use tracing::debug;

use crate::comm::WorkerGrouping;
use crate::error::{AfqmcError, Result};
use crate::linalg::packed_len;

pub use chunk::ChunkLayout;
pub use pack::{pack_cholesky, unpack_cholesky};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// This member's slice of the Cholesky factor.
#[derive(Debug, Clone)]
pub struct HamiltonianChunk {
    pub layout: ChunkLayout,
    /// `(M², local nchol)` columns of the full factor.
    pub chol: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct GenericHamiltonian {
    id: u64,
    nbasis: usize,
    nchol: usize,
    h1e: [DMatrix<f64>; 2],
    chol: Option<DMatrix<f64>>,
    chol_packed: DMatrix<f64>,
    ecore: f64,
    chunk: Option<HamiltonianChunk>,
}

impl GenericHamiltonian {
    /// Build from the unpacked factor; the packed form is derived.
    pub fn new(h1e: [DMatrix<f64>; 2], chol: DMatrix<f64>, ecore: f64) -> Result<Self> {
        let nbasis = Self::validate(&h1e, &chol)?;
        let chol_packed = pack_cholesky(&chol, nbasis);
        Ok(Self::assemble(h1e, chol, chol_packed, ecore, nbasis))
    }

    /// Build from both factor representations, which must agree.
    pub fn with_packed(
        h1e: [DMatrix<f64>; 2],
        chol: DMatrix<f64>,
        chol_packed: DMatrix<f64>,
        ecore: f64,
    ) -> Result<Self> {
        let nbasis = Self::validate(&h1e, &chol)?;
        if chol_packed.shape() != (packed_len(nbasis), chol.ncols()) {
            return Err(AfqmcError::InvalidHamiltonian(format!(
                "packed factor has shape {:?}, expected ({}, {})",
                chol_packed.shape(),
                packed_len(nbasis),
                chol.ncols()
            )));
        }
        let reference = pack_cholesky(&chol, nbasis);
        let deviation = (&reference - &chol_packed).amax();
        if deviation > SYMMETRY_TOLERANCE {
            return Err(AfqmcError::InvalidHamiltonian(format!(
                "packed and unpacked factors differ by {:e}",
                deviation
            )));
        }
        Ok(Self::assemble(h1e, chol, chol_packed, ecore, nbasis))
    }

    fn validate(h1e: &[DMatrix<f64>; 2], chol: &DMatrix<f64>) -> Result<usize> {
        let nbasis = h1e[0].nrows();
        for h in h1e.iter() {
            if h.shape() != (nbasis, nbasis) {
                return Err(AfqmcError::InvalidHamiltonian(format!(
                    "one-body matrix has shape {:?}, expected ({}, {})",
                    h.shape(),
                    nbasis,
                    nbasis
                )));
            }
        }
        if chol.nrows() != nbasis * nbasis {
            return Err(AfqmcError::InvalidHamiltonian(format!(
                "Cholesky factor has {} rows, expected {}",
                chol.nrows(),
                nbasis * nbasis
            )));
        }
        let asym = pack::asymmetry(chol, nbasis);
        if asym > SYMMETRY_TOLERANCE {
            return Err(AfqmcError::InvalidHamiltonian(format!(
                "Cholesky vectors are not symmetric (deviation {:e})",
                asym
            )));
        }
        Ok(nbasis)
    }

    fn assemble(
        h1e: [DMatrix<f64>; 2],
        chol: DMatrix<f64>,
        chol_packed: DMatrix<f64>,
        ecore: f64,
        nbasis: usize,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            nbasis,
            nchol: chol.ncols(),
            h1e,
            chol: Some(chol),
            chol_packed,
            ecore,
            chunk: None,
        }
    }

    /// Identifier distinguishing Hamiltonian instances for cache validation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn nbasis(&self) -> usize {
        self.nbasis
    }

    pub fn nchol(&self) -> usize {
        self.nchol
    }

    pub fn ecore(&self) -> f64 {
        self.ecore
    }

    pub fn h1e(&self, spin: usize) -> &DMatrix<f64> {
        &self.h1e[spin]
    }

    pub fn chol_packed(&self) -> &DMatrix<f64> {
        &self.chol_packed
    }

    /// The unpacked `(M², nchol)` factor, unavailable once chunked.
    pub fn chol_full(&self) -> Result<&DMatrix<f64>> {
        self.chol.as_ref().ok_or(AfqmcError::FullFactorUnavailable)
    }

    /// Cholesky vector `n` as a dense `M × M` matrix.
    pub fn chol_vector(&self, n: usize) -> DMatrix<f64> {
        let m = self.nbasis;
        let column = self.chol_packed.column(n);
        let mut l = DMatrix::zeros(m, m);
        let mut k = 0;
        for i in 0..m {
            for j in i..m {
                l[(i, j)] = column[k];
                l[(j, i)] = column[k];
                k += 1;
            }
        }
        l
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk.is_some()
    }

    pub fn chunk_layout(&self) -> Option<&ChunkLayout> {
        self.chunk.as_ref().map(|c| &c.layout)
    }

    pub fn local_chunk(&self) -> Option<&HamiltonianChunk> {
        self.chunk.as_ref()
    }

    /// Keep only this member's block of the unpacked factor.
    ///
    /// Irreversible; the packed factor stays available for propagation.
    pub fn chunk(&mut self, grouping: &WorkerGrouping) -> Result<()> {
        if self.chunk.is_some() {
            return Err(AfqmcError::AlreadyChunked);
        }
        let full = self.chol.take().ok_or(AfqmcError::FullFactorUnavailable)?;
        let layout = ChunkLayout::new(self.nchol, grouping);
        let range = layout.local_range();
        let chol = full.columns(range.start, range.len()).into_owned();
        debug!(
            "rank {} holds Cholesky vectors {}..{} of {}",
            grouping.rank, range.start, range.end, self.nchol
        );
        self.chunk = Some(HamiltonianChunk { layout, chol });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::generate_hamiltonian;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_asymmetric_vectors() {
        let h1 = DMatrix::identity(2, 2);
        let chol = DMatrix::from_column_slice(4, 1, &[1.0, 0.5, -0.5, 1.0]);
        let err = GenericHamiltonian::new([h1.clone(), h1], chol, 0.0).unwrap_err();
        assert!(matches!(err, AfqmcError::InvalidHamiltonian(_)));
    }

    #[test]
    fn test_rejects_inconsistent_packed_factor() {
        let mut rng = StdRng::seed_from_u64(3);
        let ham = generate_hamiltonian(3, 4, &mut rng).unwrap();
        let chol = ham.chol_full().unwrap().clone();
        let mut packed = ham.chol_packed().clone();
        packed[(0, 0)] += 1.0;
        let h = [ham.h1e(0).clone(), ham.h1e(1).clone()];
        assert!(GenericHamiltonian::with_packed(h.clone(), chol.clone(), packed, 0.0).is_err());
        let ok = GenericHamiltonian::with_packed(h, chol, ham.chol_packed().clone(), 0.0).unwrap();
        assert_ne!(ok.id(), ham.id());
    }

    #[test]
    fn test_chol_vector_matches_unpacked_columns() {
        let mut rng = StdRng::seed_from_u64(11);
        let ham = generate_hamiltonian(4, 6, &mut rng).unwrap();
        let full = ham.chol_full().unwrap();
        for n in 0..ham.nchol() {
            let l = ham.chol_vector(n);
            for p in 0..4 {
                for q in 0..4 {
                    assert_eq!(l[(p, q)], full[(p * 4 + q, n)]);
                }
            }
        }
    }

    #[test]
    fn test_chunking_is_one_shot_and_drops_full_factor() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut ham = generate_hamiltonian(3, 7, &mut rng).unwrap();
        let full = ham.chol_full().unwrap().clone();
        let grouping = WorkerGrouping::new(1, 2, 2).unwrap();
        ham.chunk(&grouping).unwrap();
        assert!(matches!(ham.chol_full(), Err(AfqmcError::FullFactorUnavailable)));
        assert!(matches!(ham.chunk(&grouping), Err(AfqmcError::AlreadyChunked)));
        let chunk = ham.local_chunk().unwrap();
        assert_eq!(chunk.layout.local_range(), 4..7);
        assert_eq!(chunk.chol, full.columns(4, 3).into_owned());
        assert_eq!(ham.chol_packed().ncols(), 7);
    }
}
