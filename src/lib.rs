//! Rust AFQMC - phaseless auxiliary-field quantum Monte Carlo in Rust
//!
//! This crate propagates weighted Slater-determinant walkers in imaginary time
//! under a Cholesky-factorised generic Hamiltonian, with a multi-determinant
//! trial wavefunction, and measures mixed estimators across cooperating workers.

pub mod backend;
pub mod comm;
pub mod error;
pub mod estimators;
pub mod hamiltonian;
pub mod linalg;
pub mod population;
pub mod propagation;
pub mod qmc;
pub mod systems;
pub mod testing;
pub mod walkers;
pub mod wavefunction;

// Re-export commonly used types at crate root
pub use backend::{backend_for, AcceleratedBackend, BackendKind, HostBackend, NumericBackend};
#[cfg(feature = "mpi")]
pub use comm::MpiComm;
pub use comm::{Communicator, RandomStream, SerialComm, ThreadComm, WorkerGrouping};
pub use error::{AfqmcError, Result};
pub use estimators::{EstimatorFile, EstimatorHandler, LocalEnergy, LocalEnergyEstimator, LocalEnergyStrategy, ObservableKind};
pub use hamiltonian::GenericHamiltonian;
pub use population::{PopulationControlPolicy, PopulationController};
pub use propagation::{PropagationMode, Propagator, PropagatorOptions};
pub use qmc::{Afqmc, DriverState, SimulationConfig};
pub use systems::Generic;
pub use walkers::WalkerBatch;
pub use wavefunction::MultiSlater;
