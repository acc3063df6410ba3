//! Batch of weighted Slater-determinant walkers.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AfqmcError, Result};
use crate::linalg::{orthonormalise, CMatrix, ONE, ZERO};
use crate::systems::Generic;
use crate::wavefunction::MultiSlater;

/// Determinant magnitudes below this kill the walker during reorthogonalisation.
const DET_R_FLOOR: f64 = 1e-300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkerBatch {
    pub nwalkers: usize,
    /// `M × nup` alpha amplitudes per walker
    pub phia: Vec<CMatrix>,
    /// `M × ndown` beta amplitudes per walker
    pub phib: Vec<CMatrix>,
    pub weight: Vec<f64>,
    /// `<Ψ_T|φ>` kept consistent with the amplitudes
    pub ovlp: Vec<Complex64>,
    pub phase: Vec<Complex64>,
    pub hybrid_energy: Vec<Complex64>,
    /// Local energy from the last estimator evaluation
    pub local_energy: Vec<Complex64>,
    /// Accumulated `ln|det R|` removed by reorthogonalisation
    pub log_shift: Vec<f64>,
    pub ortho_count: usize,
}

impl WalkerBatch {
    /// Every walker starts from the trial's initial guess with unit weight.
    pub fn new(system: &Generic, trial: &MultiSlater, nwalkers: usize) -> Result<Self> {
        let init = trial.initial_walker();
        if init.alpha.ncols() != system.nup || init.beta.ncols() != system.ndown {
            return Err(AfqmcError::InvalidTrial("initial walker does not match the system".to_string()));
        }
        let ovlp = trial.overlap(&init.alpha, &init.beta);
        if ovlp.norm() == 0.0 {
            return Err(AfqmcError::InvalidTrial("initial walker is orthogonal to the trial".to_string()));
        }
        Ok(Self {
            nwalkers,
            phia: vec![init.alpha.clone(); nwalkers],
            phib: vec![init.beta.clone(); nwalkers],
            weight: vec![1.0; nwalkers],
            ovlp: vec![ovlp; nwalkers],
            phase: vec![ONE; nwalkers],
            hybrid_energy: vec![ZERO; nwalkers],
            local_energy: vec![ZERO; nwalkers],
            log_shift: vec![0.0; nwalkers],
            ortho_count: 0,
        })
    }

    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }

    pub fn kill(&mut self, iw: usize) {
        self.weight[iw] = 0.0;
    }

    /// Overwrite walker `to` with walker `from`.
    pub fn copy_walker(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        self.phia[to] = self.phia[from].clone();
        self.phib[to] = self.phib[from].clone();
        self.weight[to] = self.weight[from];
        self.ovlp[to] = self.ovlp[from];
        self.phase[to] = self.phase[from];
        self.hybrid_energy[to] = self.hybrid_energy[from];
        self.local_energy[to] = self.local_energy[from];
        self.log_shift[to] = self.log_shift[from];
    }

    /// Overwrite walker `to` with walker `from` of another batch.
    pub fn copy_from(&mut self, source: &WalkerBatch, from: usize, to: usize) {
        self.phia[to] = source.phia[from].clone();
        self.phib[to] = source.phib[from].clone();
        self.weight[to] = source.weight[from];
        self.ovlp[to] = source.ovlp[from];
        self.phase[to] = source.phase[from];
        self.hybrid_energy[to] = source.hybrid_energy[from];
        self.local_energy[to] = source.local_energy[from];
        self.log_shift[to] = source.log_shift[from];
    }

    /// Orthonormalise every live walker, `φ ← Q` and `ovlp ← ovlp / (det R_α det R_β)`.
    pub fn reortho(&mut self) {
        for iw in 0..self.nwalkers {
            if self.weight[iw] == 0.0 {
                continue;
            }
            let (qa, ra) = orthonormalise(&self.phia[iw]);
            let (qb, rb) = orthonormalise(&self.phib[iw]);
            let det_r = ra * rb;
            if !det_r.is_finite() || det_r.norm() < DET_R_FLOOR {
                debug!("walker {} killed: vanishing det R", iw);
                self.kill(iw);
                continue;
            }
            self.phia[iw] = qa;
            self.phib[iw] = qb;
            self.ovlp[iw] /= det_r;
            self.log_shift[iw] += det_r.norm().ln();
        }
        self.ortho_count += 1;
    }

    fn check_shape(&self, system: &Generic, nbasis: usize) -> std::result::Result<(), String> {
        let n = self.nwalkers;
        let lengths = [
            ("phia", self.phia.len()),
            ("phib", self.phib.len()),
            ("weight", self.weight.len()),
            ("ovlp", self.ovlp.len()),
            ("phase", self.phase.len()),
            ("hybrid_energy", self.hybrid_energy.len()),
            ("local_energy", self.local_energy.len()),
            ("log_shift", self.log_shift.len()),
        ];
        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(format!("{} holds {} entries for {} walkers", name, len, n));
        }
        for (spin, phi) in [&self.phia, &self.phib].into_iter().enumerate() {
            let want = (nbasis, system.nspin(spin));
            if let Some(bad) = phi.iter().find(|m| m.shape() != want) {
                return Err(format!("spin {} amplitudes are {:?}, expected {:?}", spin, bad.shape(), want));
            }
        }
        Ok(())
    }
}

/// Restart record of one worker: its walkers and the driver state needed to
/// continue the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub walkers: WalkerBatch,
    pub eshift: f64,
    /// Steps completed when the checkpoint was written
    pub step: usize,
    /// Global total weight at the last population control
    pub weight_factor: f64,
}

impl Checkpoint {
    pub fn write(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Read a checkpoint and check its walkers against `system` in a basis of
    /// `nbasis` orbitals.
    pub fn read(path: &Path, system: &Generic, nbasis: usize) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;
        checkpoint
            .walkers
            .check_shape(system, nbasis)
            .map_err(|e| AfqmcError::InvalidConfig(format!("checkpoint {}: {}", path.display(), e)))?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::random_multi_det;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn batch(nwalkers: usize) -> (MultiSlater, WalkerBatch) {
        let mut rng = StdRng::seed_from_u64(21);
        let sys = Generic::new(2, 1);
        let trial = random_multi_det(&sys, 4, 3, &mut rng).unwrap();
        let walkers = WalkerBatch::new(&sys, &trial, nwalkers).unwrap();
        (trial, walkers)
    }

    #[test]
    fn test_reortho_keeps_overlap_consistent() {
        let (trial, mut walkers) = batch(2);
        walkers.phia[0] *= Complex64::new(3.0, 0.5);
        walkers.phib[0] *= Complex64::new(0.2, 0.0);
        walkers.ovlp[0] = trial.overlap(&walkers.phia[0], &walkers.phib[0]);
        walkers.reortho();
        let fresh = trial.overlap(&walkers.phia[0], &walkers.phib[0]);
        assert_relative_eq!(walkers.ovlp[0].re, fresh.re, epsilon = 1e-10);
        assert_relative_eq!(walkers.ovlp[0].im, fresh.im, epsilon = 1e-10);
        let s = walkers.phia[0].adjoint() * &walkers.phia[0];
        assert_relative_eq!(s[(1, 1)].re, 1.0, epsilon = 1e-12);
        assert_eq!(walkers.ortho_count, 1);
    }

    #[test]
    fn test_rank_deficient_walker_is_killed() {
        let (_, mut walkers) = batch(2);
        walkers.phia[1].fill(ZERO);
        walkers.reortho();
        assert_eq!(walkers.weight[1], 0.0);
        assert_eq!(walkers.weight[0], 1.0);
    }

    #[test]
    fn test_copy_and_checkpoint() {
        let (_, mut walkers) = batch(3);
        walkers.weight[2] = 2.5;
        walkers.copy_walker(2, 0);
        assert_eq!(walkers.weight[0], 2.5);
        assert_relative_eq!(walkers.total_weight(), 6.0);

        let path = std::env::temp_dir().join(format!("walkers-{}.chk", std::process::id()));
        let checkpoint = Checkpoint { walkers, eshift: -1.25, step: 40, weight_factor: 6.0 };
        checkpoint.write(&path).unwrap();
        let restored = Checkpoint::read(&path, &Generic::new(2, 1), 4).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn test_inconsistent_checkpoint_is_rejected() {
        let (_, walkers) = batch(4);
        let sys = Generic::new(2, 1);
        let path = std::env::temp_dir().join(format!("walkers-bad-{}.chk", std::process::id()));
        let checkpoint = Checkpoint { walkers, eshift: 0.0, step: 5, weight_factor: 4.0 };

        let mut truncated = checkpoint.clone();
        truncated.walkers.ovlp.truncate(2);
        truncated.write(&path).unwrap();
        let err = Checkpoint::read(&path, &sys, 4).unwrap_err();
        assert!(matches!(err, AfqmcError::InvalidConfig(ref m) if m.contains("ovlp")));

        // amplitudes from another system or basis
        checkpoint.write(&path).unwrap();
        assert!(Checkpoint::read(&path, &Generic::new(1, 1), 4).is_err());
        assert!(Checkpoint::read(&path, &sys, 5).is_err());
        assert!(Checkpoint::read(&path, &sys, 4).is_ok());
        std::fs::remove_file(&path).ok();
    }
}
