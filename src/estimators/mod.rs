//! Estimators: local contributions per worker, reduction and output.
//!
//! Observables form a closed registry ([`ObservableKind`]). Each one declares an
//! [`EstimatorSchema`] and accumulates weighted sums into its slice of the
//! worker's record; the [`EstimatorHandler`] reduces the records over all
//! workers and appends them to the output file.

pub mod energy;
pub mod handler;
pub mod local_energy;
pub mod output;
pub mod rdm;
pub mod schema;

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;

use crate::comm::Communicator;
use crate::error::{AfqmcError, Result};
use crate::hamiltonian::GenericHamiltonian;
use crate::systems::Generic;
use crate::walkers::WalkerBatch;
use crate::wavefunction::MultiSlater;

pub use energy::EnergyEstimator;
pub use handler::{EstimatorHandler, EstimatorOptions};
pub use local_energy::{LocalEnergy, LocalEnergyEstimator, LocalEnergyStrategy};
pub use output::{EstimatorFile, OutputOptions};
pub use rdm::OneRdmEstimator;
pub use schema::{EstimatorSchema, FieldSpec};

/// What an estimator sees at an evaluation.
pub struct EstimatorContext<'a> {
    pub system: &'a Generic,
    pub hamiltonian: &'a GenericHamiltonian,
    pub trial: &'a MultiSlater,
    pub walkers: &'a mut WalkerBatch,
    /// Global weight before the last population control
    pub weight_factor: f64,
    pub is_root: bool,
}

/// Everything an estimator may need at construction.
#[derive(Debug, Clone)]
pub struct EstimatorSetup<'a> {
    pub system: &'a Generic,
    pub hamiltonian: &'a GenericHamiltonian,
    pub trial: &'a MultiSlater,
    /// Communicator of this worker's chunking group
    pub group: Arc<dyn Communicator>,
    pub default_strategy: LocalEnergyStrategy,
}

pub trait Estimator: fmt::Debug + Send {
    fn schema(&self) -> &EstimatorSchema;

    /// Evaluate every this many steps.
    fn eval_freq(&self) -> usize;

    /// Add this evaluation's weighted sums into `local`.
    fn compute(&mut self, ctx: &mut EstimatorContext<'_>, local: &mut [Complex64]) -> Result<()>;

    /// Turn reduced sums over `nevals` evaluations into block estimates.
    fn finalise_block(&self, global: &mut [Complex64], nevals: usize);
}

type Constructor = fn(&serde_yaml::Value, &EstimatorSetup<'_>) -> Result<Box<dyn Estimator>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObservableKind {
    Energy,
    OneRdm,
}

impl ObservableKind {
    pub const ALL: [ObservableKind; 2] = [ObservableKind::Energy, ObservableKind::OneRdm];

    pub fn name(self) -> &'static str {
        match self {
            ObservableKind::Energy => "energy",
            ObservableKind::OneRdm => "one_rdm",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == name)
            .ok_or_else(|| AfqmcError::UnknownObservable(name.to_string()))
    }

    fn constructor(self) -> Constructor {
        match self {
            ObservableKind::Energy => energy::build,
            ObservableKind::OneRdm => rdm::build,
        }
    }

    pub fn build(self, options: &serde_yaml::Value, setup: &EstimatorSetup<'_>) -> Result<Box<dyn Estimator>> {
        (self.constructor())(options, setup)
    }
}

/// Parse observable options; a missing or null block means defaults.
pub(crate) fn parse_options<T>(options: &serde_yaml::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    Ok(serde_yaml::from_value(options.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_closed() {
        assert_eq!(ObservableKind::from_name("energy").unwrap(), ObservableKind::Energy);
        assert_eq!(ObservableKind::from_name("one_rdm").unwrap(), ObservableKind::OneRdm);
        let err = ObservableKind::from_name("mixed").unwrap_err();
        assert_eq!(err.to_string(), "unknown observable: mixed");
    }
}
