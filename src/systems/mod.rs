//! Systems module - electron counts of the simulated system.

use serde::{Deserialize, Serialize};

/// A generic ab initio system: only the number of electrons per spin channel
/// enters the propagation, everything else lives in the Hamiltonian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generic {
    pub nup: usize,
    pub ndown: usize,
}

impl Generic {
    pub fn new(nup: usize, ndown: usize) -> Self {
        Self { nup, ndown }
    }

    /// Electrons in spin channel `spin` (0 = alpha, 1 = beta).
    pub fn nspin(&self, spin: usize) -> usize {
        if spin == 0 {
            self.nup
        } else {
            self.ndown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_channels() {
        let sys = Generic::new(2, 1);
        assert_eq!(sys.nspin(0), 2);
        assert_eq!(sys.nspin(1), 1);
    }
}
