//! Random model systems for tests and for the launcher's generator section.

use nalgebra::DMatrix;
use num_complex::Complex64;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{AfqmcError, Result};
use crate::hamiltonian::GenericHamiltonian;
use crate::linalg::{orthonormalise, CMatrix, ONE};
use crate::systems::Generic;
use crate::wavefunction::{Determinant, MultiSlater};

fn symmetric<R: Rng>(m: usize, scale: f64, rng: &mut R) -> DMatrix<f64> {
    let a: DMatrix<f64> = DMatrix::from_distribution(m, m, &StandardNormal, rng);
    (&a + a.transpose()) * (0.5 * scale)
}

/// Random real Hamiltonian with `nchol` symmetric Cholesky vectors.
pub fn generate_hamiltonian<R: Rng>(nmo: usize, nchol: usize, rng: &mut R) -> Result<GenericHamiltonian> {
    let h1 = symmetric(nmo, 1.0, rng);
    let mut chol = DMatrix::zeros(nmo * nmo, nchol);
    for n in 0..nchol {
        let l = symmetric(nmo, 0.5, rng);
        for p in 0..nmo {
            for q in 0..nmo {
                chol[(p * nmo + q, n)] = l[(p, q)];
            }
        }
    }
    let ecore = rng.gen::<f64>();
    GenericHamiltonian::new([h1.clone(), h1], chol, ecore)
}

fn occupation(nbasis: usize, occ: &[usize]) -> CMatrix {
    let mut orb = CMatrix::zeros(nbasis, occ.len());
    for (col, &row) in occ.iter().enumerate() {
        orb[(row, col)] = ONE;
    }
    orb
}

fn random_orthonormal<R: Rng>(nbasis: usize, nocc: usize, rng: &mut R) -> CMatrix {
    let re: DMatrix<f64> = DMatrix::from_distribution(nbasis, nocc, &StandardNormal, rng);
    let im: DMatrix<f64> = DMatrix::from_distribution(nbasis, nocc, &StandardNormal, rng);
    let phi = re.zip_map(&im, |a, b| Complex64::new(a, 0.1 * b));
    orthonormalise(&phi).0
}

/// Multi-determinant trial of particle-hole excitations in an orthonormal
/// basis, ordered so the first determinant is the aufbau state. The initial
/// walker is a random orthonormal set of orbitals.
pub fn random_multi_det<R: Rng>(
    system: &Generic,
    nbasis: usize,
    ndets: usize,
    rng: &mut R,
) -> Result<MultiSlater> {
    let alpha_occs = combinations(nbasis, system.nup);
    let beta_occs = combinations(nbasis, system.ndown);
    if alpha_occs.is_empty() || beta_occs.is_empty() {
        return Err(AfqmcError::InvalidTrial(format!(
            "cannot place ({}, {}) electrons in {} orbitals",
            system.nup, system.ndown, nbasis
        )));
    }

    let mut pairs: Vec<(usize, usize)> = (0..alpha_occs.len())
        .flat_map(|a| (0..beta_occs.len()).map(move |b| (a, b)))
        .skip(1)
        .collect();
    pairs.shuffle(rng);
    pairs.insert(0, (0, 0));
    pairs.truncate(ndets.max(1));

    let dets: Vec<Determinant> = pairs
        .iter()
        .map(|&(a, b)| Determinant::new(occupation(nbasis, &alpha_occs[a]), occupation(nbasis, &beta_occs[b])))
        .collect();
    let coeffs: Vec<Complex64> = (0..dets.len())
        .map(|i| {
            let scale = if i == 0 { 1.0 } else { 0.3 };
            Complex64::new(scale * (1.0 + rng.gen::<f64>()), 0.2 * scale * rng.gen::<f64>())
        })
        .collect();
    let init = Determinant::new(
        random_orthonormal(nbasis, system.nup, rng),
        random_orthonormal(nbasis, system.ndown, rng),
    );
    Ok(MultiSlater::new(system, nbasis, coeffs, dets, Some(init))?.normalised())
}

/// Single aufbau determinant with a random initial walker.
pub fn random_single_det<R: Rng>(system: &Generic, nbasis: usize, rng: &mut R) -> Result<MultiSlater> {
    random_multi_det(system, nbasis, 1, rng)
}

/// All `k`-subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if current[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        current[i] += 1;
        for j in (i + 1)..k {
            current[j] = current[j - 1] + 1;
        }
    }
}
