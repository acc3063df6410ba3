//! Half-rotated integrals of the trial expansion.
//!
//! For every determinant and spin the one-body matrix and each Cholesky vector
//! are rotated into the occupied space, `rh1 = D† h1` and `D† L_n`. The rotated
//! Cholesky blocks are stacked into one `(nchol · N) × M` matrix so the
//! contraction with a walker's `Θ` is a single product.

use tracing::debug;

use super::MultiSlater;
use crate::comm::WorkerGrouping;
use crate::error::{AfqmcError, Result};
use crate::hamiltonian::{ChunkLayout, GenericHamiltonian};
use crate::linalg::{to_complex, CMatrix};
use crate::systems::Generic;

#[derive(Debug, Clone)]
pub struct RotatedDet {
    /// `D_σ† h1_σ`, `N_σ × M`
    pub rh1: [CMatrix; 2],
    /// rows `n * N_σ + i` hold `(D_σ† L_n)[i, :]`
    pub rchol: [CMatrix; 2],
}

#[derive(Debug, Clone)]
pub struct HalfRotated {
    pub hamiltonian_id: u64,
    pub nchol: usize,
    pub dets: Vec<RotatedDet>,
}

/// Rows of the rotated factor for this member's Cholesky range.
#[derive(Debug, Clone)]
pub struct HalfRotatedChunk {
    pub layout: ChunkLayout,
    pub rchol: Vec<[CMatrix; 2]>,
}

impl MultiSlater {
    /// Build the half-rotated cache against `hamiltonian`. Repeated calls with
    /// the same Hamiltonian keep the existing cache.
    pub fn half_rotate(&mut self, system: &Generic, hamiltonian: &GenericHamiltonian) -> Result<()> {
        if system.nup != self.nspin(0) || system.ndown != self.nspin(1) {
            return Err(AfqmcError::InvalidTrial(format!(
                "trial holds ({}, {}) electrons, system ({}, {})",
                self.nspin(0),
                self.nspin(1),
                system.nup,
                system.ndown
            )));
        }
        if let Some(rot) = &self.rotated {
            if rot.hamiltonian_id == hamiltonian.id() {
                return Ok(());
            }
        }
        if hamiltonian.nbasis() != self.nbasis() {
            return Err(AfqmcError::InvalidTrial(format!(
                "trial has {} orbitals, Hamiltonian {}",
                self.nbasis(),
                hamiltonian.nbasis()
            )));
        }
        let m = self.nbasis();
        let nchol = hamiltonian.nchol();
        let vectors: Vec<CMatrix> = (0..nchol).map(|n| to_complex(&hamiltonian.chol_vector(n))).collect();
        let h1 = [to_complex(hamiltonian.h1e(0)), to_complex(hamiltonian.h1e(1))];

        let mut dets = Vec::with_capacity(self.ndets());
        for det in self.determinants() {
            let mut rh1 = [CMatrix::zeros(system.nup, m), CMatrix::zeros(system.ndown, m)];
            let mut rchol = [CMatrix::zeros(nchol * system.nup, m), CMatrix::zeros(nchol * system.ndown, m)];
            for spin in 0..2 {
                let dag = det.spin(spin).adjoint();
                let nocc = system.nspin(spin);
                rh1[spin] = &dag * &h1[spin];
                for (n, l) in vectors.iter().enumerate() {
                    let block = &dag * l;
                    rchol[spin].rows_mut(n * nocc, nocc).copy_from(&block);
                }
            }
            dets.push(RotatedDet { rh1, rchol });
        }
        debug!("half-rotated {} determinants over {} Cholesky vectors", dets.len(), nchol);
        self.rotated = Some(HalfRotated { hamiltonian_id: hamiltonian.id(), nchol, dets });
        self.chunked = None;
        Ok(())
    }

    /// The cache built against `hamiltonian`.
    pub fn half_rotated(&self, hamiltonian: &GenericHamiltonian) -> Result<&HalfRotated> {
        let rot = self.rotated.as_ref().ok_or(AfqmcError::NotHalfRotated)?;
        if rot.hamiltonian_id != hamiltonian.id() {
            return Err(AfqmcError::HalfRotationMismatch);
        }
        Ok(rot)
    }

    /// Keep a copy of this member's rows of the rotated factor, mirroring
    /// [`GenericHamiltonian::chunk`]. The full cache is retained.
    pub fn chunk(&mut self, grouping: &WorkerGrouping) -> Result<()> {
        if self.chunked.is_some() {
            return Err(AfqmcError::AlreadyChunked);
        }
        let rot = self.rotated.as_ref().ok_or(AfqmcError::NotHalfRotated)?;
        let layout = ChunkLayout::new(rot.nchol, grouping);
        let range = layout.local_range();
        let rchol = rot
            .dets
            .iter()
            .map(|d| {
                let spin_rows = |spin: usize| {
                    let nocc = self.nspin(spin);
                    d.rchol[spin].rows(range.start * nocc, range.len() * nocc).into_owned()
                };
                [spin_rows(0), spin_rows(1)]
            })
            .collect();
        self.chunked = Some(HalfRotatedChunk { layout, rchol });
        Ok(())
    }

    pub fn chunk_layout(&self) -> Option<&ChunkLayout> {
        self.chunked.as_ref().map(|c| &c.layout)
    }

    pub fn local_chunk(&self) -> Option<&HalfRotatedChunk> {
        self.chunked.as_ref()
    }

    /// Fail unless trial and Hamiltonian are split the same way.
    pub fn check_chunk_layout(&self, hamiltonian: &GenericHamiltonian) -> Result<()> {
        match (self.chunk_layout(), hamiltonian.chunk_layout()) {
            (None, None) => Ok(()),
            (Some(t), Some(h)) if t == h => Ok(()),
            (t, h) => Err(AfqmcError::ChunkLayoutMismatch(format!(
                "trial {:?}, Hamiltonian {:?}",
                t, h
            ))),
        }
    }
}
