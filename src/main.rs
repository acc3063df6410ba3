use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, Level};

use rust_afqmc::backend::BackendKind;
use rust_afqmc::testing::{generate_hamiltonian, random_multi_det};
use rust_afqmc::{Afqmc, Communicator, Generic, Result, SimulationConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Phaseless AFQMC for a random generic Hamiltonian", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Use the accelerated backend regardless of the configuration
    #[arg(long)]
    accelerate: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args, comm: Arc<dyn Communicator>) -> Result<()> {
    let mut config = SimulationConfig::from_file(&args.config)?;
    if args.accelerate {
        config.qmc.backend = BackendKind::Accelerated;
    }

    let g = config.generator.clone();
    if comm.is_root() {
        info!(
            "generating {} orbitals, {} Cholesky vectors, ({}, {}) electrons, {} determinants on {} workers",
            g.nbasis,
            g.nchol,
            g.nup,
            g.ndown,
            g.ndets,
            comm.size()
        );
    }
    let mut rng = StdRng::seed_from_u64(g.seed);
    let system = Generic::new(g.nup, g.ndown);
    let hamiltonian = generate_hamiltonian(g.nbasis, g.nchol, &mut rng)?;
    let trial = random_multi_det(&system, g.nbasis, g.ndets, &mut rng)?;

    let mut afqmc = Afqmc::new(comm.clone(), system, hamiltonian, trial, config)?;
    afqmc.run(args.verbose)?;
    afqmc.finalise(args.verbose)?;
    if comm.is_root() {
        info!("final energy shift {:.10}", afqmc.eshift());
    }
    Ok(())
}

// MPI is finalised when the universe drops, after the run has returned
#[cfg(feature = "mpi")]
fn launch(args: &Args) -> Result<()> {
    let universe = mpi::initialize()
        .ok_or_else(|| rust_afqmc::AfqmcError::Communicator("MPI was already initialised".to_string()))?;
    run(args, Arc::new(rust_afqmc::MpiComm::world(&universe)))
}

#[cfg(not(feature = "mpi"))]
fn launch(args: &Args) -> Result<()> {
    run(args, Arc::new(rust_afqmc::SerialComm))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose { Level::INFO } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).init();

    match launch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
