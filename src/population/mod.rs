//! Population control.
//!
//! Branching rebalances walker weights without biasing the weighted
//! estimators. Weights are first normalised so the global mean is one, then
//! the configured policy acts on each worker's batch.

mod comb;
mod pair_branch;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comm::{Communicator, RandomStream};
use crate::error::{AfqmcError, Result};
use crate::walkers::WalkerBatch;

pub use comb::comb;
pub use pair_branch::pair_branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PopulationControlPolicy {
    PairBranch,
    Comb,
}

impl FromStr for PopulationControlPolicy {
    type Err = AfqmcError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "pair_branch" => Ok(Self::PairBranch),
            "comb" => Ok(Self::Comb),
            other => Err(AfqmcError::UnknownPopulationControl(other.to_string())),
        }
    }
}

impl TryFrom<String> for PopulationControlPolicy {
    type Error = AfqmcError;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl From<PopulationControlPolicy> for String {
    fn from(policy: PopulationControlPolicy) -> Self {
        match policy {
            PopulationControlPolicy::PairBranch => "pair_branch".to_string(),
            PopulationControlPolicy::Comb => "comb".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PopulationController {
    pub policy: PopulationControlPolicy,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl PopulationController {
    pub fn new(policy: PopulationControlPolicy, min_weight: f64, max_weight: f64) -> Self {
        Self { policy, min_weight, max_weight }
    }

    /// Apply the policy to this worker's batch.
    pub fn control(&self, walkers: &mut WalkerBatch, rng: &mut RandomStream) {
        match self.policy {
            PopulationControlPolicy::PairBranch => pair_branch(walkers, self.min_weight, self.max_weight, rng),
            PopulationControlPolicy::Comb => comb(walkers, rng),
        }
    }

    /// Normalise weights to a global mean of one and branch.
    ///
    /// Returns the global total weight before normalisation.
    pub fn pop_control(&self, walkers: &mut WalkerBatch, comm: &dyn Communicator, rng: &mut RandomStream) -> f64 {
        let global = comm.sum_reduce(&[walkers.total_weight(), walkers.nwalkers as f64]);
        let (total, count) = (global[0], global[1]);
        if total > 0.0 && count > 0.0 {
            let scale = count / total;
            for w in walkers.weight.iter_mut() {
                *w *= scale;
            }
        }
        self.control(walkers, rng);
        debug!("population control: total weight {:.6}", total);
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::systems::Generic;
    use crate::testing::random_multi_det;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_policy_names() {
        assert_eq!("comb".parse::<PopulationControlPolicy>().unwrap(), PopulationControlPolicy::Comb);
        let err = "stochastic_reconfiguration".parse::<PopulationControlPolicy>().unwrap_err();
        assert!(matches!(err, AfqmcError::UnknownPopulationControl(ref name) if name == "stochastic_reconfiguration"));
        let parsed: PopulationControlPolicy = serde_yaml::from_str("pair_branch").unwrap();
        assert_eq!(parsed, PopulationControlPolicy::PairBranch);
        assert!(serde_yaml::from_str::<PopulationControlPolicy>("branch").is_err());
    }

    #[test]
    fn test_pop_control_normalises_to_unit_mean() {
        let mut rng = StdRng::seed_from_u64(4);
        let sys = Generic::new(1, 1);
        let trial = random_multi_det(&sys, 3, 2, &mut rng).unwrap();
        let mut walkers = WalkerBatch::new(&sys, &trial, 4).unwrap();
        walkers.weight = vec![2.0, 2.0, 2.0, 2.0];
        let controller = PopulationController::new(PopulationControlPolicy::PairBranch, 0.1, 4.0);
        let mut stream = RandomStream::new(0, 0);
        let total = controller.pop_control(&mut walkers, &SerialComm, &mut stream);
        assert_relative_eq!(total, 8.0);
        assert_relative_eq!(walkers.total_weight(), 4.0, epsilon = 1e-12);
    }
}
