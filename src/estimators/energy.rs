//! Mixed energy estimator.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::{parse_options, Estimator, EstimatorContext, EstimatorSchema, EstimatorSetup};
use crate::error::{AfqmcError, Result};
use crate::estimators::local_energy::{LocalEnergyEstimator, LocalEnergyStrategy};

pub const FIELDS: [&str; 9] =
    ["Weight", "WeightFactor", "ENumer", "EDenom", "ETotal", "E1Body", "E2Body", "EHybrid", "Overlap"];

const WEIGHT: usize = 0;
const WEIGHT_FACTOR: usize = 1;
const ENUMER: usize = 2;
const EDENOM: usize = 3;
const ETOTAL: usize = 4;
const E1BODY: usize = 5;
const E2BODY: usize = 6;
const EHYBRID: usize = 7;
const OVERLAP: usize = 8;

fn default_eval_freq() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnergyOptions {
    pub energy_eval_freq: usize,
    /// Falls back to the driver's strategy when absent
    pub strategy: Option<LocalEnergyStrategy>,
}

impl Default for EnergyOptions {
    fn default() -> Self {
        Self { energy_eval_freq: default_eval_freq(), strategy: None }
    }
}

#[derive(Debug)]
pub struct EnergyEstimator {
    schema: EstimatorSchema,
    eval_freq: usize,
    local_energy: LocalEnergyEstimator,
}

impl EnergyEstimator {
    pub fn new(options: EnergyOptions, setup: &EstimatorSetup<'_>) -> Result<Self> {
        if options.energy_eval_freq == 0 {
            return Err(AfqmcError::InvalidConfig("energy_eval_freq must be positive".to_string()));
        }
        let strategy = options.strategy.unwrap_or(setup.default_strategy);
        Ok(Self {
            schema: EstimatorSchema::scalars(&FIELDS),
            eval_freq: options.energy_eval_freq,
            local_energy: LocalEnergyEstimator::new(strategy, setup.group.clone()),
        })
    }

    pub fn strategy(&self) -> LocalEnergyStrategy {
        self.local_energy.strategy()
    }
}

pub(crate) fn build(options: &serde_yaml::Value, setup: &EstimatorSetup<'_>) -> Result<Box<dyn Estimator>> {
    Ok(Box::new(EnergyEstimator::new(parse_options(options)?, setup)?))
}

impl Estimator for EnergyEstimator {
    fn schema(&self) -> &EstimatorSchema {
        &self.schema
    }

    fn eval_freq(&self) -> usize {
        self.eval_freq
    }

    fn compute(&mut self, ctx: &mut EstimatorContext<'_>, local: &mut [Complex64]) -> Result<()> {
        // collective when the Hamiltonian is chunked: every walker goes in
        let energies = self.local_energy.compute(ctx.system, ctx.hamiltonian, &*ctx.walkers, ctx.trial)?;
        let walkers = &mut *ctx.walkers;
        for (iw, e) in energies.iter().enumerate() {
            walkers.local_energy[iw] = e.total;
            let w = walkers.weight[iw];
            if w == 0.0 {
                continue;
            }
            local[WEIGHT] += w;
            local[ENUMER] += e.total * w;
            local[EDENOM] += w;
            local[E1BODY] += e.one_body * w;
            local[E2BODY] += e.two_body * w;
            local[EHYBRID] += walkers.hybrid_energy[iw] * w;
            local[OVERLAP] += walkers.ovlp[iw] * w;
        }
        if ctx.is_root {
            local[WEIGHT_FACTOR] += ctx.weight_factor;
        }
        Ok(())
    }

    fn finalise_block(&self, global: &mut [Complex64], nevals: usize) {
        if nevals > 0 {
            for v in global.iter_mut() {
                *v /= nevals as f64;
            }
        }
        let denom = global[EDENOM];
        if denom.norm() > 0.0 {
            global[ETOTAL] = global[ENUMER] / denom;
            for i in [E1BODY, E2BODY, EHYBRID] {
                global[i] /= denom;
            }
        }
    }
}
