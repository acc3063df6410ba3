//! Mixed local energy of every walker against the multi-Slater trial.
//!
//! Three strategies produce the same numbers:
//!
//! * `direct` contracts full Green's functions with the unpacked factor,
//! * `chunked` uses the half-rotated cache and streams Cholesky vectors in
//!   passes sized to a memory budget; with a chunked Hamiltonian the members
//!   of a group exchange their walkers so each can add its block of vectors,
//! * `accelerated` runs the half-rotated kernel on the accelerated backend in a
//!   single pass.

use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::backend::{AcceleratedBackend, HostBackend, NumericBackend};
use crate::comm::Communicator;
use crate::error::{AfqmcError, Result};
use crate::hamiltonian::GenericHamiltonian;
use crate::linalg::{
    block_square_trace, block_trace, flatten_complex, to_complex, unflatten_complex, CMatrix, ZERO,
};
use crate::systems::Generic;
use crate::walkers::WalkerBatch;
use crate::wavefunction::{MixedState, MultiSlater};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

fn default_max_mem_gb() -> f64 {
    2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalEnergyStrategy {
    Direct,
    Chunked {
        #[serde(default = "default_max_mem_gb")]
        max_mem_gb: f64,
    },
    Accelerated,
}

impl Default for LocalEnergyStrategy {
    fn default() -> Self {
        Self::Chunked { max_mem_gb: default_max_mem_gb() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalEnergy {
    pub total: Complex64,
    pub one_body: Complex64,
    pub two_body: Complex64,
}

/// Mixing weights and `Θ` matrices of one walker, exchanged between group members.
#[derive(Debug, Clone)]
struct WalkerState {
    weights: Vec<Complex64>,
    theta: Vec<[CMatrix; 2]>,
}

impl From<&MixedState> for WalkerState {
    fn from(m: &MixedState) -> Self {
        Self { weights: m.weights.clone(), theta: m.theta.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct LocalEnergyEstimator {
    strategy: LocalEnergyStrategy,
    group: Arc<dyn Communicator>,
    backend: Arc<dyn NumericBackend>,
}

impl LocalEnergyEstimator {
    /// `group` connects the members sharing one set of walkers' Cholesky blocks.
    pub fn new(strategy: LocalEnergyStrategy, group: Arc<dyn Communicator>) -> Self {
        let backend: Arc<dyn NumericBackend> = match strategy {
            LocalEnergyStrategy::Accelerated => Arc::new(AcceleratedBackend),
            _ => Arc::new(HostBackend),
        };
        Self { strategy, group, backend }
    }

    pub fn strategy(&self) -> LocalEnergyStrategy {
        self.strategy
    }

    pub fn compute(
        &self,
        system: &Generic,
        hamiltonian: &GenericHamiltonian,
        walkers: &WalkerBatch,
        trial: &MultiSlater,
    ) -> Result<Vec<LocalEnergy>> {
        trial.check_chunk_layout(hamiltonian)?;
        match self.strategy {
            LocalEnergyStrategy::Direct => direct_energies(hamiltonian, walkers, trial),
            LocalEnergyStrategy::Chunked { max_mem_gb } => {
                let bytes_per_vector =
                    16.0 * (system.nup.pow(2) + system.ndown.pow(2)) as f64 * walkers.nwalkers.max(1) as f64;
                let per_pass = ((max_mem_gb * BYTES_PER_GB) / bytes_per_vector).floor().max(1.0) as usize;
                self.rotated_energies(system, hamiltonian, walkers, trial, Some(per_pass))
            }
            LocalEnergyStrategy::Accelerated => self.rotated_energies(system, hamiltonian, walkers, trial, None),
        }
    }

    fn rotated_energies(
        &self,
        system: &Generic,
        hamiltonian: &GenericHamiltonian,
        walkers: &WalkerBatch,
        trial: &MultiSlater,
        per_pass: Option<usize>,
    ) -> Result<Vec<LocalEnergy>> {
        let rotated = trial.half_rotated(hamiltonian)?;
        let mixed: Vec<MixedState> = (0..walkers.nwalkers)
            .map(|iw| trial.mixed_state(&walkers.phia[iw], &walkers.phib[iw]))
            .collect();

        let one_body: Vec<Complex64> = mixed
            .iter()
            .map(|m| {
                let mut e1 = ZERO;
                for (idet, (w, det)) in m.weights.iter().zip(rotated.dets.iter()).enumerate() {
                    if *w == ZERO {
                        continue;
                    }
                    for spin in 0..2 {
                        e1 += w * (&det.rh1[spin] * &m.theta[idet][spin]).trace();
                    }
                }
                e1
            })
            .collect();

        let (rchol, nlocal): (Vec<&[CMatrix; 2]>, usize) = match trial.local_chunk() {
            Some(chunk) => (chunk.rchol.iter().collect(), chunk.layout.local_len()),
            None => (rotated.dets.iter().map(|d| &d.rchol).collect(), rotated.nchol),
        };
        let per_pass = per_pass.unwrap_or(nlocal).max(1);
        let nocc = [system.nup, system.ndown];

        let local_states: Vec<WalkerState> = mixed.iter().map(WalkerState::from).collect();
        let two_body = match hamiltonian.chunk_layout() {
            Some(layout) if layout.nmembers > 1 => {
                if layout.nmembers != self.group.size() {
                    return Err(AfqmcError::ChunkLayoutMismatch(format!(
                        "layout spans {} members but the group has {} workers",
                        layout.nmembers,
                        self.group.size()
                    )));
                }
                let (states, offset) = self.gather_states(&local_states, trial, nocc)?;
                let partial = self.two_body(&states, &rchol, nocc, nlocal, per_pass);
                let summed = unflatten_complex(&self.group.sum_reduce(&flatten_complex(&partial)));
                summed[offset..offset + walkers.nwalkers].to_vec()
            }
            _ => self.two_body(&local_states, &rchol, nocc, nlocal, per_pass),
        };

        let ecore = hamiltonian.ecore();
        Ok(one_body
            .into_iter()
            .zip(two_body)
            .map(|(e1, e2)| LocalEnergy { total: e1 + e2 + ecore, one_body: e1, two_body: e2 })
            .collect())
    }

    /// `½ Σ_n [(Tr T_α,n + Tr T_β,n)² - Σ_σ Tr(T_σ,n T_σ,n)]` over the local
    /// vectors, mixed over determinants.
    fn two_body(
        &self,
        states: &[WalkerState],
        rchol: &[&[CMatrix; 2]],
        nocc: [usize; 2],
        nlocal: usize,
        per_pass: usize,
    ) -> Vec<Complex64> {
        let mut e2 = vec![ZERO; states.len()];
        for (idet, r) in rchol.iter().enumerate() {
            let thetas = [0, 1].map(|spin| states.iter().map(|s| s.theta[idet][spin].clone()).collect::<Vec<_>>());
            let mut start = 0;
            while start < nlocal {
                let nb = per_pass.min(nlocal - start);
                let products = [0, 1].map(|spin| {
                    let block = r[spin].rows(start * nocc[spin], nb * nocc[spin]).into_owned();
                    self.backend.gemm_batched_left(&block, &thetas[spin])
                });
                for (k, state) in states.iter().enumerate() {
                    let w = state.weights[idet];
                    if w == ZERO {
                        continue;
                    }
                    let (ta, tb) = (&products[0][k], &products[1][k]);
                    let mut acc = ZERO;
                    for n in 0..nb {
                        let coulomb = block_trace(ta, n * nocc[0], nocc[0]) + block_trace(tb, n * nocc[1], nocc[1]);
                        let exchange = block_square_trace(ta, n * nocc[0], nocc[0])
                            + block_square_trace(tb, n * nocc[1], nocc[1]);
                        acc += coulomb * coulomb - exchange;
                    }
                    e2[k] += w * acc * 0.5;
                }
                start += nb;
            }
        }
        e2
    }

    /// All-gather walker states within the group; returns every member's
    /// walkers in rank order and the offset of this member's first walker.
    fn gather_states(
        &self,
        local: &[WalkerState],
        trial: &MultiSlater,
        nocc: [usize; 2],
    ) -> Result<(Vec<WalkerState>, usize)> {
        let m = trial.nbasis();
        let ndets = trial.ndets();
        let per_walker = ndets * (1 + m * (nocc[0] + nocc[1]));

        let mut packed = Vec::with_capacity(local.len() * per_walker);
        for s in local {
            packed.extend_from_slice(&s.weights);
            for blocks in s.theta.iter() {
                for b in blocks.iter() {
                    packed.extend(b.iter().cloned());
                }
            }
        }
        let gathered = self.group.all_gather(&flatten_complex(&packed));

        let mut states = Vec::new();
        let mut offset = 0;
        for (member, buffer) in gathered.iter().enumerate() {
            let values = unflatten_complex(buffer);
            if values.len() % per_walker.max(1) != 0 {
                return Err(AfqmcError::ChunkLayoutMismatch(format!(
                    "member {} sent {} values, not a multiple of {}",
                    member,
                    values.len(),
                    per_walker
                )));
            }
            if member == self.group.rank() {
                offset = states.len();
            }
            for chunk in values.chunks(per_walker.max(1)) {
                let weights = chunk[..ndets].to_vec();
                let mut cursor = ndets;
                let mut theta = Vec::with_capacity(ndets);
                for _ in 0..ndets {
                    let a = CMatrix::from_column_slice(m, nocc[0], &chunk[cursor..cursor + m * nocc[0]]);
                    cursor += m * nocc[0];
                    let b = CMatrix::from_column_slice(m, nocc[1], &chunk[cursor..cursor + m * nocc[1]]);
                    cursor += m * nocc[1];
                    theta.push([a, b]);
                }
                states.push(WalkerState { weights, theta });
            }
        }
        Ok((states, offset))
    }
}

/// Per-determinant energies from `Θ D†` and the unpacked factor.
fn direct_energies(
    hamiltonian: &GenericHamiltonian,
    walkers: &WalkerBatch,
    trial: &MultiSlater,
) -> Result<Vec<LocalEnergy>> {
    let chol = hamiltonian.chol_full()?;
    let m = hamiltonian.nbasis();
    let vectors: Vec<CMatrix> = (0..hamiltonian.nchol())
        .map(|n| CMatrix::from_fn(m, m, |p, q| Complex64::new(chol[(p * m + q, n)], 0.0)))
        .collect();
    let h1 = [to_complex(hamiltonian.h1e(0)), to_complex(hamiltonian.h1e(1))];

    let mut energies = Vec::with_capacity(walkers.nwalkers);
    for iw in 0..walkers.nwalkers {
        let mixed = trial.mixed_state(&walkers.phia[iw], &walkers.phib[iw]);
        let (mut e1, mut e2) = (ZERO, ZERO);
        for (idet, w) in mixed.weights.iter().enumerate() {
            if *w == ZERO {
                continue;
            }
            let gt = [trial.transition_density(&mixed, idet, 0), trial.transition_density(&mixed, idet, 1)];
            let one = (&h1[0] * &gt[0]).trace() + (&h1[1] * &gt[1]).trace();
            let mut two = ZERO;
            for l in vectors.iter() {
                let la = l * &gt[0];
                let lb = l * &gt[1];
                let coulomb = la.trace() + lb.trace();
                two += coulomb * coulomb - (&la * &la).trace() - (&lb * &lb).trace();
            }
            e1 += w * one;
            e2 += w * two * 0.5;
        }
        energies.push(LocalEnergy { total: e1 + e2 + hamiltonian.ecore(), one_body: e1, two_body: e2 });
    }
    Ok(energies)
}
