//! Mixed one-body reduced density matrix.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::{parse_options, Estimator, EstimatorContext, EstimatorSchema, EstimatorSetup};
use crate::error::{AfqmcError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OneRdmOptions {
    pub eval_freq: usize,
}

impl Default for OneRdmOptions {
    fn default() -> Self {
        Self { eval_freq: 1 }
    }
}

/// Accumulates `Σ_w w G_σ,pq` stored spin-major, row-major in `p, q`.
#[derive(Debug)]
pub struct OneRdmEstimator {
    schema: EstimatorSchema,
    eval_freq: usize,
    nbasis: usize,
}

impl OneRdmEstimator {
    pub fn new(options: OneRdmOptions, setup: &EstimatorSetup<'_>) -> Result<Self> {
        if options.eval_freq == 0 {
            return Err(AfqmcError::InvalidConfig("one_rdm eval_freq must be positive".to_string()));
        }
        let m = setup.trial.nbasis();
        Ok(Self {
            schema: EstimatorSchema::new([("Denominator", vec![1]), ("OneRdm", vec![2, m, m])]),
            eval_freq: options.eval_freq,
            nbasis: m,
        })
    }
}

pub(crate) fn build(options: &serde_yaml::Value, setup: &EstimatorSetup<'_>) -> Result<Box<dyn Estimator>> {
    Ok(Box::new(OneRdmEstimator::new(parse_options(options)?, setup)?))
}

impl Estimator for OneRdmEstimator {
    fn schema(&self) -> &EstimatorSchema {
        &self.schema
    }

    fn eval_freq(&self) -> usize {
        self.eval_freq
    }

    fn compute(&mut self, ctx: &mut EstimatorContext<'_>, local: &mut [Complex64]) -> Result<()> {
        let m = self.nbasis;
        let walkers = &*ctx.walkers;
        for iw in 0..walkers.nwalkers {
            let w = walkers.weight[iw];
            if w == 0.0 {
                continue;
            }
            let mixed = ctx.trial.mixed_state(&walkers.phia[iw], &walkers.phib[iw]);
            let g = ctx.trial.greens_function(&mixed);
            local[0] += w;
            for (spin, gs) in g.iter().enumerate() {
                for p in 0..m {
                    for q in 0..m {
                        local[1 + spin * m * m + p * m + q] += gs[(p, q)] * w;
                    }
                }
            }
        }
        Ok(())
    }

    fn finalise_block(&self, global: &mut [Complex64], nevals: usize) {
        if nevals > 0 {
            for v in global.iter_mut() {
                *v /= nevals as f64;
            }
        }
        let denom = global[0];
        if denom.norm() > 0.0 {
            for v in global[1..].iter_mut() {
                *v /= denom;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::estimators::LocalEnergyStrategy;
    use crate::systems::Generic;
    use crate::testing::{generate_hamiltonian, random_multi_det};
    use crate::walkers::WalkerBatch;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn test_traces_count_electrons() {
        let mut rng = StdRng::seed_from_u64(5);
        let sys = Generic::new(2, 1);
        let ham = generate_hamiltonian(4, 3, &mut rng).unwrap();
        let trial = random_multi_det(&sys, 4, 3, &mut rng).unwrap();
        let mut walkers = WalkerBatch::new(&sys, &trial, 2).unwrap();
        walkers.weight = vec![0.5, 1.5];
        let setup = EstimatorSetup {
            system: &sys,
            hamiltonian: &ham,
            trial: &trial,
            group: Arc::new(SerialComm),
            default_strategy: LocalEnergyStrategy::default(),
        };
        let mut estimator = OneRdmEstimator::new(OneRdmOptions::default(), &setup).unwrap();
        assert_eq!(estimator.schema().len(), 1 + 2 * 16);
        let mut local = vec![Complex64::new(0.0, 0.0); estimator.schema().len()];
        let mut ctx = EstimatorContext {
            system: &sys,
            hamiltonian: &ham,
            trial: &trial,
            walkers: &mut walkers,
            weight_factor: 2.0,
            is_root: true,
        };
        estimator.compute(&mut ctx, &mut local).unwrap();
        estimator.finalise_block(&mut local, 1);
        assert_relative_eq!(local[0].re, 2.0);
        let trace = |spin: usize| (0..4).map(|p| local[1 + spin * 16 + p * 4 + p]).sum::<Complex64>();
        assert_relative_eq!(trace(0).re, 2.0, epsilon = 1e-10);
        assert_relative_eq!(trace(0).im, 0.0, epsilon = 1e-10);
        assert_relative_eq!(trace(1).re, 1.0, epsilon = 1e-10);
    }
}
