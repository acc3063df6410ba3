use super::Propagator;
use crate::comm::RandomStream;
use crate::linalg::{apply_exponential, CMatrix, I};
use crate::walkers::WalkerBatch;
use crate::wavefunction::MultiSlater;

impl Propagator {
    /// Propagate one walker at a time from its full mixed Green's function.
    pub(super) fn propagate_reference(
        &self,
        walkers: &mut WalkerBatch,
        trial: &MultiSlater,
        eshift: f64,
        rng: &mut RandomStream,
    ) {
        let m = self.nbasis;
        for iw in 0..walkers.nwalkers {
            if walkers.weight[iw] <= 0.0 {
                self.skip_fields(rng);
                continue;
            }
            self.apply_one_body(walkers, iw);

            let mixed = trial.mixed_state(&walkers.phia[iw], &walkers.phib[iw]);
            let g = trial.greens_function(&mixed);
            let density = &g[0] + &g[1];
            let vbias: Vec<_> = self.vectors.iter().map(|l| l.component_mul(&density).sum()).collect();
            let fields = self.sample_fields(&vbias, rng);

            let mut v = CMatrix::zeros(m, m);
            for (l, xs) in self.vectors.iter().zip(fields.xshifted.iter()) {
                v += l * *xs;
            }
            v *= I * self.sqrt_dt;
            walkers.phia[iw] = apply_exponential(&v, &walkers.phia[iw], self.options.taylor_order);
            walkers.phib[iw] = apply_exponential(&v, &walkers.phib[iw], self.options.taylor_order);

            self.apply_one_body(walkers, iw);
            let ovlp = trial.overlap(&walkers.phia[iw], &walkers.phib[iw]);
            self.update_weight(walkers, iw, ovlp, &fields, eshift);
        }
    }
}
