//! Multi-Slater trial wavefunction.
//!
//! The trial state is a linear combination of Slater determinants,
//! `|Ψ_T> = Σ_I c_I |D_I>`, and overlaps are taken with the conjugated
//! coefficients: `<Ψ_T|φ> = Σ_I conj(c_I) det(D_Iα† φ_α) det(D_Iβ† φ_β)`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::half_rotation::{HalfRotated, HalfRotatedChunk};
use crate::error::{AfqmcError, Result};
use crate::linalg::{det_and_inverse, CMatrix, ZERO};
use crate::systems::Generic;

/// Alpha and beta orbitals of one Slater determinant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Determinant {
    /// `M × nup` occupied alpha orbitals
    pub alpha: CMatrix,
    /// `M × ndown` occupied beta orbitals
    pub beta: CMatrix,
}

impl Determinant {
    pub fn new(alpha: CMatrix, beta: CMatrix) -> Self {
        Self { alpha, beta }
    }

    pub fn spin(&self, spin: usize) -> &CMatrix {
        if spin == 0 {
            &self.alpha
        } else {
            &self.beta
        }
    }
}

/// Mixed quantities of a walker against every determinant of the expansion.
#[derive(Debug, Clone)]
pub struct MixedState {
    /// Total overlap `<Ψ_T|φ>`
    pub overlap: Complex64,
    /// `w_I = conj(c_I) O_I / <Ψ_T|φ>`
    pub weights: Vec<Complex64>,
    /// `Θ_Iσ = φ_σ (D_Iσ† φ_σ)^-1`, zero for determinants orthogonal to the walker
    pub theta: Vec<[CMatrix; 2]>,
}

#[derive(Debug, Clone)]
pub struct MultiSlater {
    nbasis: usize,
    nup: usize,
    ndown: usize,
    coeffs: Vec<Complex64>,
    dets: Vec<Determinant>,
    init: Determinant,
    pub(crate) rotated: Option<HalfRotated>,
    pub(crate) chunked: Option<HalfRotatedChunk>,
}

impl MultiSlater {
    /// Create a trial from an expansion. Without an explicit initial walker the
    /// first determinant is used.
    pub fn new(
        system: &Generic,
        nbasis: usize,
        coeffs: Vec<Complex64>,
        dets: Vec<Determinant>,
        init: Option<Determinant>,
    ) -> Result<Self> {
        if dets.is_empty() || coeffs.len() != dets.len() {
            return Err(AfqmcError::InvalidTrial(format!(
                "{} coefficients for {} determinants",
                coeffs.len(),
                dets.len()
            )));
        }
        let expected = [(nbasis, system.nup), (nbasis, system.ndown)];
        for det in dets.iter().chain(init.iter()) {
            for spin in 0..2 {
                if det.spin(spin).shape() != expected[spin] {
                    return Err(AfqmcError::InvalidTrial(format!(
                        "orbital block has shape {:?}, expected {:?}",
                        det.spin(spin).shape(),
                        expected[spin]
                    )));
                }
            }
        }
        let init = init.unwrap_or_else(|| dets[0].clone());
        Ok(Self {
            nbasis,
            nup: system.nup,
            ndown: system.ndown,
            coeffs,
            dets,
            init,
            rotated: None,
            chunked: None,
        })
    }

    pub fn nbasis(&self) -> usize {
        self.nbasis
    }

    pub fn ndets(&self) -> usize {
        self.dets.len()
    }

    pub fn nspin(&self, spin: usize) -> usize {
        if spin == 0 {
            self.nup
        } else {
            self.ndown
        }
    }

    pub fn coeffs(&self) -> &[Complex64] {
        &self.coeffs
    }

    pub fn determinants(&self) -> &[Determinant] {
        &self.dets
    }

    pub fn initial_walker(&self) -> &Determinant {
        &self.init
    }

    /// Overlaps, mixing weights and `Θ` matrices of a walker.
    pub fn mixed_state(&self, phia: &CMatrix, phib: &CMatrix) -> MixedState {
        let phi = [phia, phib];
        let mut terms = Vec::with_capacity(self.dets.len());
        let mut theta = Vec::with_capacity(self.dets.len());
        for (c, det) in self.coeffs.iter().zip(self.dets.iter()) {
            let mut ovlp = c.conj();
            let mut blocks = [CMatrix::zeros(self.nbasis, self.nup), CMatrix::zeros(self.nbasis, self.ndown)];
            for spin in 0..2 {
                let s = det.spin(spin).adjoint() * phi[spin];
                let (d, inv) = det_and_inverse(&s);
                ovlp *= d;
                if let Some(inv) = inv {
                    blocks[spin] = phi[spin] * inv;
                }
            }
            terms.push(ovlp);
            theta.push(blocks);
        }
        let overlap = terms.iter().fold(ZERO, |acc, o| acc + o);
        let weights = if overlap.norm() > 0.0 {
            terms.iter().map(|o| o / overlap).collect()
        } else {
            vec![ZERO; terms.len()]
        };
        MixedState { overlap, weights, theta }
    }

    pub fn overlap(&self, phia: &CMatrix, phib: &CMatrix) -> Complex64 {
        let phi = [phia, phib];
        self.coeffs
            .iter()
            .zip(self.dets.iter())
            .map(|(c, det)| {
                (0..2).fold(c.conj(), |acc, spin| {
                    let s = det.spin(spin).adjoint() * phi[spin];
                    acc * det_and_inverse(&s).0
                })
            })
            .fold(ZERO, |acc, o| acc + o)
    }

    /// `Θ_Iσ D_Iσ†`, the transpose of the Green's function of determinant I.
    pub fn transition_density(&self, mixed: &MixedState, idet: usize, spin: usize) -> CMatrix {
        &mixed.theta[idet][spin] * self.dets[idet].spin(spin).adjoint()
    }

    /// Mixed Green's function `G_σ,pq = <Ψ_T|c_p† c_q|φ> / <Ψ_T|φ>` for both spins.
    pub fn greens_function(&self, mixed: &MixedState) -> [CMatrix; 2] {
        let mut g = [CMatrix::zeros(self.nbasis, self.nbasis), CMatrix::zeros(self.nbasis, self.nbasis)];
        for (idet, w) in mixed.weights.iter().enumerate() {
            if *w == ZERO {
                continue;
            }
            for (spin, gs) in g.iter_mut().enumerate() {
                *gs += self.transition_density(mixed, idet, spin).transpose() * *w;
            }
        }
        g
    }

    /// Green's function of the first determinant with itself.
    pub fn reference_density(&self) -> [CMatrix; 2] {
        let d = &self.dets[0];
        let mut g = [CMatrix::zeros(self.nbasis, self.nbasis), CMatrix::zeros(self.nbasis, self.nbasis)];
        for (spin, gs) in g.iter_mut().enumerate() {
            let orb = d.spin(spin);
            let s = orb.adjoint() * orb;
            if let (_, Some(inv)) = det_and_inverse(&s) {
                *gs = (orb * inv * orb.adjoint()).transpose();
            }
        }
        g
    }

    /// Normalise so that `<Ψ_T|Ψ_T>` is one for orthonormal determinants.
    pub fn normalised(mut self) -> Self {
        let norm = self.coeffs.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
        if norm > 0.0 {
            for c in self.coeffs.iter_mut() {
                *c /= norm;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::ONE;
    use crate::testing::random_multi_det;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mixing_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(7);
        let sys = Generic::new(2, 1);
        let trial = random_multi_det(&sys, 4, 5, &mut rng).unwrap();
        let init = trial.initial_walker();
        let mixed = trial.mixed_state(&init.alpha, &init.beta);
        let total = mixed.weights.iter().fold(ZERO, |a, w| a + w);
        assert_relative_eq!(total.re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(total.im, 0.0, epsilon = 1e-12);
        let ovlp = trial.overlap(&init.alpha, &init.beta);
        assert_relative_eq!(ovlp.re, mixed.overlap.re, epsilon = 1e-12);
        assert_relative_eq!(ovlp.im, mixed.overlap.im, epsilon = 1e-12);
    }

    #[test]
    fn test_greens_function_trace_counts_electrons() {
        let mut rng = StdRng::seed_from_u64(13);
        let sys = Generic::new(2, 1);
        let trial = random_multi_det(&sys, 4, 3, &mut rng).unwrap();
        let init = trial.initial_walker();
        let g = trial.greens_function(&trial.mixed_state(&init.alpha, &init.beta));
        assert_relative_eq!(g[0].trace().re, 2.0, epsilon = 1e-10);
        assert_relative_eq!(g[1].trace().re, 1.0, epsilon = 1e-10);
        let g0 = trial.reference_density();
        assert_relative_eq!(g0[0].trace().re, 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rejects_mismatched_orbital_shapes() {
        let sys = Generic::new(2, 1);
        let det = Determinant::new(CMatrix::zeros(3, 1), CMatrix::zeros(3, 1));
        let err = MultiSlater::new(&sys, 3, vec![ONE], vec![det], None).unwrap_err();
        assert!(matches!(err, AfqmcError::InvalidTrial(_)));
    }
}
