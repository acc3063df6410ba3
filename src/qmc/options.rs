//! Run configuration, read from YAML.
//!
//! ```yaml
//! qmc:
//!   timestep: 0.005
//!   steps: 25
//!   blocks: 10
//!   nwalkers_per_task: 25
//!   rng_seed: 7
//! estimates:
//!   observables:
//!     energy: {energy_eval_freq: 1}
//! walkers:
//!   population_control: pair_branch
//! chunking:
//!   nmembers: 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{AfqmcError, Result};
use crate::estimators::{EstimatorOptions, LocalEnergyStrategy};
use crate::population::PopulationControlPolicy;
use crate::propagation::PropagatorOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QmcOptions {
    pub timestep: f64,
    /// Steps per block
    pub steps: usize,
    pub blocks: usize,
    pub nwalkers_per_task: usize,
    pub stabilise_freq: usize,
    pub pop_control_freq: usize,
    /// Drawn on the root and shared when absent
    pub rng_seed: Option<u64>,
    /// Half-rotated batched kernels instead of the per-walker reference path
    pub batched: bool,
    pub backend: BackendKind,
    /// Local-energy strategy for observables that do not choose their own
    pub energy_strategy: LocalEnergyStrategy,
    /// Per-worker walker checkpoints are `<checkpoint>.<rank>.chk`
    pub checkpoint: Option<PathBuf>,
    /// Start from the checkpoints instead of the trial's initial guess.
    ///
    /// The walkers, energy shift, step count and weight factor are restored.
    /// Block numbering starts again from 1 and the random stream is reseeded
    /// past the streams of the first run.
    pub restart: bool,
}

impl Default for QmcOptions {
    fn default() -> Self {
        Self {
            timestep: 0.005,
            steps: 25,
            blocks: 10,
            nwalkers_per_task: 10,
            stabilise_freq: 5,
            pop_control_freq: 5,
            rng_seed: None,
            batched: true,
            backend: BackendKind::Host,
            energy_strategy: LocalEnergyStrategy::default(),
            checkpoint: None,
            restart: false,
        }
    }
}

impl QmcOptions {
    pub fn checkpoint_path(&self, rank: usize) -> Option<PathBuf> {
        self.checkpoint
            .as_ref()
            .map(|prefix| PathBuf::from(format!("{}.{}.chk", prefix.display(), rank)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalkerOptions {
    pub population_control: PopulationControlPolicy,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Weights are clipped to this fraction of the global total weight
    pub weight_cap_fraction: f64,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        Self {
            population_control: PopulationControlPolicy::PairBranch,
            min_weight: 0.1,
            max_weight: 4.0,
            weight_cap_fraction: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingOptions {
    /// Workers sharing one set of Cholesky blocks
    pub nmembers: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self { nmembers: 1 }
    }
}

/// Random model system built by the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorOptions {
    pub nbasis: usize,
    pub nchol: usize,
    pub nup: usize,
    pub ndown: usize,
    pub ndets: usize,
    pub seed: u64,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self { nbasis: 4, nchol: 8, nup: 2, ndown: 2, ndets: 3, seed: 7 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub qmc: QmcOptions,
    pub estimates: EstimatorOptions,
    pub walkers: WalkerOptions,
    pub propagator: PropagatorOptions,
    pub chunking: ChunkingOptions,
    pub generator: GeneratorOptions,
}

impl SimulationConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let q = &self.qmc;
        if q.timestep.is_nan() || q.timestep <= 0.0 {
            return Err(AfqmcError::InvalidConfig(format!("timestep must be positive, got {}", q.timestep)));
        }
        for (name, value) in [
            ("steps", q.steps),
            ("nwalkers_per_task", q.nwalkers_per_task),
            ("stabilise_freq", q.stabilise_freq),
            ("pop_control_freq", q.pop_control_freq),
            ("chunking.nmembers", self.chunking.nmembers),
        ] {
            if value == 0 {
                return Err(AfqmcError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        let w = &self.walkers;
        if w.min_weight < 0.0 || w.min_weight >= w.max_weight {
            return Err(AfqmcError::InvalidConfig(format!(
                "need 0 <= min_weight < max_weight, got {} and {}",
                w.min_weight, w.max_weight
            )));
        }
        if w.weight_cap_fraction <= 0.0 {
            return Err(AfqmcError::InvalidConfig("weight_cap_fraction must be positive".to_string()));
        }
        let p = &self.propagator;
        if p.taylor_order == 0 {
            return Err(AfqmcError::InvalidConfig("taylor_order must be positive".to_string()));
        }
        for (name, value) in [
            ("phaseless_tolerance", p.phaseless_tolerance),
            ("force_bias_cap", p.force_bias_cap),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(AfqmcError::InvalidConfig(format!("{} must be positive, got {}", name, value)));
            }
        }
        if p.overlap_floor.is_nan() || p.overlap_floor < 0.0 {
            return Err(AfqmcError::InvalidConfig(format!(
                "overlap_floor must not be negative, got {}",
                p.overlap_floor
            )));
        }
        if q.restart && q.checkpoint.is_none() {
            return Err(AfqmcError::InvalidConfig("restart needs a checkpoint prefix".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sections_default_independently() {
        let config = SimulationConfig::from_yaml(
            "qmc:\n  steps: 3\n  rng_seed: 9\nwalkers:\n  population_control: comb\nchunking:\n  nmembers: 2\n",
        )
        .unwrap();
        assert_eq!(config.qmc.steps, 3);
        assert_eq!(config.qmc.rng_seed, Some(9));
        assert_relative_eq!(config.qmc.timestep, 0.005);
        assert_eq!(config.walkers.population_control, PopulationControlPolicy::Comb);
        assert_relative_eq!(config.walkers.max_weight, 4.0);
        assert_eq!(config.chunking.nmembers, 2);
        assert!(config.estimates.observables.contains_key("energy"));
    }

    #[test]
    fn test_yaml_echo_parses_back() {
        let config = SimulationConfig::from_yaml("qmc:\n  blocks: 4\n  backend: accelerated\n").unwrap();
        let echo = config.to_yaml().unwrap();
        assert_eq!(SimulationConfig::from_yaml(&echo).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(SimulationConfig::from_yaml("qmc:\n  timestep: -0.1\n").is_err());
        assert!(SimulationConfig::from_yaml("qmc:\n  stabilise_freq: 0\n").is_err());
        assert!(SimulationConfig::from_yaml("walkers:\n  min_weight: 5.0\n").is_err());
        assert!(SimulationConfig::from_yaml("walkers:\n  population_control: reconfigure\n").is_err());
        assert!(SimulationConfig::from_yaml("qmc:\n  restart: true\n").is_err());
        assert!(SimulationConfig::from_yaml("qmcc: {}\n").is_err());
    }

    #[test]
    fn test_propagator_options_are_checked() {
        let err = SimulationConfig::from_yaml("propagator:\n  taylor_order: 0\n").unwrap_err();
        assert!(matches!(err, AfqmcError::InvalidConfig(ref m) if m.contains("taylor_order")));
        assert!(SimulationConfig::from_yaml("propagator:\n  phaseless_tolerance: -1.0\n").is_err());
        assert!(SimulationConfig::from_yaml("propagator:\n  force_bias_cap: 0.0\n").is_err());
        assert!(SimulationConfig::from_yaml("propagator:\n  overlap_floor: -1.0e-8\n").is_err());
        let ok = SimulationConfig::from_yaml("propagator:\n  taylor_order: 4\n  phaseless_tolerance: 0.5\n").unwrap();
        assert_eq!(ok.propagator.taylor_order, 4);
    }

    #[test]
    fn test_checkpoint_paths_are_per_rank() {
        let mut q = QmcOptions::default();
        assert!(q.checkpoint_path(0).is_none());
        q.checkpoint = Some(PathBuf::from("run/walkers"));
        assert_eq!(q.checkpoint_path(3), Some(PathBuf::from("run/walkers.3.chk")));
    }
}
