//! Mean-field subtracted one-body propagator.

use num_complex::Complex64;

use crate::hamiltonian::GenericHamiltonian;
use crate::linalg::{to_complex, CMatrix, I, ZERO};
use crate::wavefunction::MultiSlater;

#[derive(Debug, Clone)]
pub struct MeanField {
    /// `i Σ_pq L_n,pq (G⁰α + G⁰β)_pq` from the trial's leading determinant
    pub mf_shift: Vec<Complex64>,
    /// `ecore + ½ Σ_n mf_shift_n²`
    pub mf_core: Complex64,
    /// `exp(-dt/2 H1_σ)` with `H1_σ = h1_σ - v0/2 - i Σ_n mf_shift_n L_n`
    pub exp_h1: [CMatrix; 2],
}

impl MeanField {
    pub fn new(hamiltonian: &GenericHamiltonian, trial: &MultiSlater, vectors: &[CMatrix], dt: f64) -> Self {
        let m = hamiltonian.nbasis();
        let g0 = trial.reference_density();
        let density = &g0[0] + &g0[1];

        let mf_shift: Vec<Complex64> = vectors
            .iter()
            .map(|l| I * l.component_mul(&density).sum())
            .collect();

        let mut v0 = CMatrix::zeros(m, m);
        let mut shift = CMatrix::zeros(m, m);
        for (l, s) in vectors.iter().zip(mf_shift.iter()) {
            v0 += l * l;
            shift += l * (I * s);
        }

        let mf_core = mf_shift.iter().fold(ZERO, |acc, s| acc + s * s) * 0.5 + hamiltonian.ecore();
        let half_step = Complex64::new(-0.5 * dt, 0.0);
        let exp_h1 = [0, 1].map(|spin| {
            let h1 = to_complex(hamiltonian.h1e(spin)) - &v0 * Complex64::new(0.5, 0.0) - &shift;
            (h1 * half_step).exp()
        });
        Self { mf_shift, mf_core, exp_h1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::Generic;
    use crate::testing::{generate_hamiltonian, random_single_det};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mean_field_shift_is_imaginary_for_real_orbitals() {
        let mut rng = StdRng::seed_from_u64(17);
        let ham = generate_hamiltonian(3, 4, &mut rng).unwrap();
        let trial = random_single_det(&Generic::new(2, 1), 3, &mut rng).unwrap();
        let vectors: Vec<CMatrix> = (0..4).map(|n| to_complex(&ham.chol_vector(n))).collect();
        let mf = MeanField::new(&ham, &trial, &vectors, 0.01);
        for s in mf.mf_shift.iter() {
            assert_relative_eq!(s.re, 0.0, epsilon = 1e-14);
        }
        // imaginary shift squared lowers the constant
        assert!(mf.mf_core.re <= ham.ecore() + 1e-14);
        let still = MeanField::new(&ham, &trial, &vectors, 0.0);
        let identity = CMatrix::identity(3, 3);
        for (a, b) in still.exp_h1[1].iter().zip(identity.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-14);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-14);
        }
    }
}
