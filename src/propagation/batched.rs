use num_complex::Complex64;

use super::{FieldSample, Propagator};
use crate::comm::RandomStream;
use crate::error::Result;
use crate::hamiltonian::GenericHamiltonian;
use crate::linalg::{apply_exponential, block_trace, unpack_symmetric, CMatrix, I, ZERO};
use crate::walkers::WalkerBatch;
use crate::wavefunction::{HalfRotated, MixedState, MultiSlater};

impl Propagator {
    pub(super) fn propagate_batched(
        &self,
        walkers: &mut WalkerBatch,
        hamiltonian: &GenericHamiltonian,
        trial: &MultiSlater,
        eshift: f64,
        rng: &mut RandomStream,
    ) -> Result<()> {
        let rotated = trial.half_rotated(hamiltonian)?;
        let live: Vec<usize> = (0..walkers.nwalkers).filter(|&iw| walkers.weight[iw] > 0.0).collect();

        for &iw in live.iter() {
            self.apply_one_body(walkers, iw);
        }

        let vbias = self.force_bias(walkers, trial, rotated, &live);
        let mut samples = Vec::with_capacity(live.len());
        let mut next = live.iter().peekable();
        for iw in 0..walkers.nwalkers {
            if next.peek() == Some(&&iw) {
                samples.push(self.sample_fields(&vbias[samples.len()], rng));
                next.next();
            } else {
                self.skip_fields(rng);
            }
        }

        self.apply_two_body(walkers, &live, &samples);

        for &iw in live.iter() {
            self.apply_one_body(walkers, iw);
        }
        for (fields, &iw) in samples.iter().zip(live.iter()) {
            let ovlp = trial.overlap(&walkers.phia[iw], &walkers.phib[iw]);
            self.update_weight(walkers, iw, ovlp, fields, eshift);
        }
        Ok(())
    }

    /// `vbias_n = Σ_I w_I Σ_σ Tr(rchol_Iσ,n Θ_Iσ)` for every live walker.
    fn force_bias(
        &self,
        walkers: &WalkerBatch,
        trial: &MultiSlater,
        rotated: &HalfRotated,
        live: &[usize],
    ) -> Vec<Vec<Complex64>> {
        let nchol = self.vectors.len();
        let mixed: Vec<MixedState> = live
            .iter()
            .map(|&iw| trial.mixed_state(&walkers.phia[iw], &walkers.phib[iw]))
            .collect();
        let mut vbias = vec![vec![ZERO; nchol]; live.len()];
        for (idet, det) in rotated.dets.iter().enumerate() {
            for spin in 0..2 {
                let nocc = trial.nspin(spin);
                let thetas: Vec<CMatrix> = mixed.iter().map(|m| m.theta[idet][spin].clone()).collect();
                let products = self.backend.gemm_batched_left(&det.rchol[spin], &thetas);
                for ((t, m), vb) in products.iter().zip(mixed.iter()).zip(vbias.iter_mut()) {
                    let w = m.weights[idet];
                    for (n, v) in vb.iter_mut().enumerate() {
                        *v += w * block_trace(t, n * nocc, nocc);
                    }
                }
            }
        }
        vbias
    }

    /// Build `V = i√dt Σ_n x̃_n L_n` for the batch in one product with the
    /// packed factor and apply `exp(V)`.
    fn apply_two_body(&self, walkers: &mut WalkerBatch, live: &[usize], samples: &[FieldSample]) {
        if live.is_empty() {
            return;
        }
        let nchol = self.vectors.len();
        let x = CMatrix::from_fn(nchol, live.len(), |n, k| samples[k].xshifted[n]);
        let packed_vhs = self.backend.gemm(&self.packed, &x);
        let scale = I * self.sqrt_dt;
        for (k, &iw) in live.iter().enumerate() {
            let v = unpack_symmetric(packed_vhs.column(k).iter().cloned(), self.nbasis) * scale;
            walkers.phia[iw] = apply_exponential(&v, &walkers.phia[iw], self.options.taylor_order);
            walkers.phib[iw] = apply_exponential(&v, &walkers.phib[iw], self.options.taylor_order);
        }
    }
}
