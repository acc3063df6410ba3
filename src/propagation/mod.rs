//! Imaginary-time propagation with a hybrid importance-sampled
//! Hubbard–Stratonovich transformation and the phaseless constraint.
//!
//! One step applies `exp(-dt/2 H1) exp(V(x - x̄)) exp(-dt/2 H1)` to every
//! walker, where `x̄` is the capped force bias. The weight is then updated from
//! the hybrid energy and walkers whose phase rotates past the phaseless
//! tolerance are killed.
//!
//! Two modes exist. The batched mode uses the trial's half-rotated cache and
//! backend GEMMs over the whole batch; the reference mode loops over walkers
//! with full Green's functions. Both draw the auxiliary fields walker-major
//! from the same random stream.

mod batched;
mod operators;
mod reference;

use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::NumericBackend;
use crate::comm::RandomStream;
use crate::error::{AfqmcError, Result};
use crate::hamiltonian::GenericHamiltonian;
use crate::linalg::{to_complex, CMatrix, I};
use crate::walkers::WalkerBatch;
use crate::wavefunction::MultiSlater;

pub use operators::MeanField;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropagatorOptions {
    /// Largest allowed magnitude of a force bias component
    pub force_bias_cap: f64,
    /// Order of the Taylor expansion of `exp(V)`
    pub taylor_order: usize,
    /// Largest phase change a walker may pick up in one step
    pub phaseless_tolerance: f64,
    /// Walkers whose overlap falls below this are killed
    pub overlap_floor: f64,
}

impl Default for PropagatorOptions {
    fn default() -> Self {
        Self {
            force_bias_cap: 1.0,
            taylor_order: 6,
            phaseless_tolerance: std::f64::consts::FRAC_PI_2,
            overlap_floor: 1e-16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    Batched,
    Reference,
}

/// Auxiliary-field terms of one walker for one step.
#[derive(Debug, Clone)]
pub(crate) struct FieldSample {
    pub xshifted: Vec<Complex64>,
    /// `x·x̄ - ½ x̄·x̄`
    pub cfb: Complex64,
    /// `-√dt x̃·mf_shift`
    pub cmf: Complex64,
}

#[derive(Debug)]
pub struct Propagator {
    dt: f64,
    sqrt_dt: f64,
    options: PropagatorOptions,
    mode: PropagationMode,
    mean_field: MeanField,
    nbasis: usize,
    /// `L_n` as dense complex matrices
    vectors: Vec<CMatrix>,
    /// Packed factor in the backend representation
    packed: CMatrix,
    backend: Arc<dyn NumericBackend>,
}

impl Propagator {
    pub fn new(
        hamiltonian: &GenericHamiltonian,
        trial: &MultiSlater,
        dt: f64,
        options: PropagatorOptions,
        mode: PropagationMode,
        backend: Arc<dyn NumericBackend>,
    ) -> Result<Self> {
        if dt.is_nan() || dt <= 0.0 {
            return Err(AfqmcError::InvalidConfig(format!("timestep must be positive, got {}", dt)));
        }
        if mode == PropagationMode::Batched {
            trial.half_rotated(hamiltonian)?;
        }
        let vectors: Vec<CMatrix> = (0..hamiltonian.nchol())
            .map(|n| to_complex(&hamiltonian.chol_vector(n)))
            .collect();
        let mean_field = MeanField::new(hamiltonian, trial, &vectors, dt);
        let packed = backend.cast(hamiltonian.chol_packed());
        Ok(Self {
            dt,
            sqrt_dt: dt.sqrt(),
            options,
            mode,
            mean_field,
            nbasis: hamiltonian.nbasis(),
            vectors,
            packed,
            backend,
        })
    }

    pub fn mode(&self) -> PropagationMode {
        self.mode
    }

    pub fn mean_field(&self) -> &MeanField {
        &self.mean_field
    }

    /// Advance every walker by one timestep.
    pub fn propagate(
        &self,
        walkers: &mut WalkerBatch,
        hamiltonian: &GenericHamiltonian,
        trial: &MultiSlater,
        eshift: f64,
        rng: &mut RandomStream,
    ) -> Result<()> {
        match self.mode {
            PropagationMode::Batched => self.propagate_batched(walkers, hamiltonian, trial, eshift, rng),
            PropagationMode::Reference => {
                self.propagate_reference(walkers, trial, eshift, rng);
                Ok(())
            }
        }
    }

    fn apply_one_body(&self, walkers: &mut WalkerBatch, iw: usize) {
        walkers.phia[iw] = &self.mean_field.exp_h1[0] * &walkers.phia[iw];
        walkers.phib[iw] = &self.mean_field.exp_h1[1] * &walkers.phib[iw];
    }

    /// Draw this walker's fields and combine them with its force bias `vbias`.
    fn sample_fields(&self, vbias: &[Complex64], rng: &mut RandomStream) -> FieldSample {
        let cap = self.options.force_bias_cap;
        let mut xshifted = Vec::with_capacity(vbias.len());
        let mut cfb = Complex64::new(0.0, 0.0);
        let mut cmf = Complex64::new(0.0, 0.0);
        for (vb, mf) in vbias.iter().zip(self.mean_field.mf_shift.iter()) {
            let mut xbar = -(I * vb - mf) * self.sqrt_dt;
            let magnitude = xbar.norm();
            if magnitude > cap {
                xbar *= cap / magnitude;
            }
            let x = rng.normal();
            let xs = x - xbar;
            cfb += xbar * x - xbar * xbar * 0.5;
            cmf -= xs * mf * self.sqrt_dt;
            xshifted.push(xs);
        }
        FieldSample { xshifted, cfb, cmf }
    }

    /// Fields for a walker that no longer contributes; the stream still advances.
    fn skip_fields(&self, rng: &mut RandomStream) {
        for _ in 0..self.vectors.len() {
            rng.normal();
        }
    }

    /// Hybrid-energy reweighting and the phaseless constraint.
    fn update_weight(&self, walkers: &mut WalkerBatch, iw: usize, ovlp_new: Complex64, fields: &FieldSample, eshift: f64) {
        let ovlp_old = walkers.ovlp[iw];
        if ovlp_new.norm() < self.options.overlap_floor || ovlp_old.norm() == 0.0 {
            debug!("walker {} killed: vanishing overlap", iw);
            walkers.kill(iw);
            return;
        }
        let ratio = ovlp_new / ovlp_old;
        let mut hybrid = -(ratio.ln() + fields.cfb + fields.cmf) / self.dt + self.mean_field.mf_core;
        let bound = (2.0 / self.dt).sqrt();
        hybrid.re = hybrid.re.clamp(eshift - bound, eshift + bound);

        let importance = (-(hybrid - eshift) * self.dt).exp();
        let dtheta = (-hybrid * self.dt - fields.cfb).im;
        if !importance.is_finite() || dtheta.abs() > self.options.phaseless_tolerance {
            debug!("walker {} killed: phase change {:.3}", iw, dtheta);
            walkers.kill(iw);
            return;
        }
        walkers.weight[iw] *= importance.norm() * dtheta.cos().max(0.0);
        walkers.phase[iw] *= Complex64::from_polar(1.0, dtheta);
        walkers.ovlp[iw] = ovlp_new;
        walkers.hybrid_energy[iw] = hybrid;
    }
}

#[cfg(test)]
mod tests;
