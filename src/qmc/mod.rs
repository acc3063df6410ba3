//! Driver for phaseless auxiliary-field quantum Monte Carlo runs.

mod driver;
mod options;

pub use driver::{Afqmc, DriverState, Timings};
pub use options::{ChunkingOptions, GeneratorOptions, QmcOptions, SimulationConfig, WalkerOptions};
