//! Phaseless AFQMC driver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::options::SimulationConfig;
use crate::backend::backend_for;
use crate::comm::{broadcast, Communicator, RandomStream, WorkerGrouping};
use crate::error::Result;
use crate::estimators::output::BlockRecord;
use crate::estimators::{EstimatorContext, EstimatorHandler, EstimatorSetup, LocalEnergyEstimator};
use crate::hamiltonian::GenericHamiltonian;
use crate::population::PopulationController;
use crate::propagation::{PropagationMode, Propagator};
use crate::systems::Generic;
use crate::walkers::{Checkpoint, WalkerBatch};
use crate::wavefunction::MultiSlater;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Propagating,
    Stabilizing,
    PopulationControlling,
    Estimating,
    Accumulating,
    Writing,
    Finished,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    pub setup: Duration,
    pub propagate: Duration,
    pub stabilise: Duration,
    pub population: Duration,
    pub estimate: Duration,
}

#[derive(Debug)]
pub struct Afqmc {
    comm: Arc<dyn Communicator>,
    config: SimulationConfig,
    system: Generic,
    hamiltonian: GenericHamiltonian,
    trial: MultiSlater,
    walkers: WalkerBatch,
    propagator: Propagator,
    population: PopulationController,
    estimators: EstimatorHandler,
    rng: RandomStream,
    eshift: f64,
    /// Global total weight at the last population control
    weight_factor: f64,
    state: DriverState,
    step: usize,
    records: Vec<BlockRecord>,
    timings: Timings,
}

impl Afqmc {
    /// Collective over `comm`; every worker must pass the same system,
    /// Hamiltonian, trial and configuration.
    pub fn new(
        comm: Arc<dyn Communicator>,
        system: Generic,
        mut hamiltonian: GenericHamiltonian,
        mut trial: MultiSlater,
        mut config: SimulationConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        config.validate()?;
        let grouping = WorkerGrouping::from_comm(comm.as_ref(), config.chunking.nmembers)?;

        let mut seed = config.qmc.rng_seed.unwrap_or_else(rand::random);
        broadcast(comm.as_ref(), &mut seed, 0)?;
        config.qmc.rng_seed = Some(seed);

        trial.half_rotate(&system, &hamiltonian)?;
        if grouping.nmembers > 1 {
            hamiltonian.chunk(&grouping)?;
            trial.chunk(&grouping)?;
        }
        let group = comm.split(grouping.group())?;

        let mode = if config.qmc.batched { PropagationMode::Batched } else { PropagationMode::Reference };
        let propagator = Propagator::new(
            &hamiltonian,
            &trial,
            config.qmc.timestep,
            config.propagator,
            mode,
            backend_for(config.qmc.backend),
        )?;

        let restart = match config.qmc.checkpoint_path(comm.rank()) {
            Some(path) if config.qmc.restart => {
                info!("restarting from {}", path.display());
                Some(Checkpoint::read(&path, &system, hamiltonian.nbasis())?)
            }
            _ => None,
        };
        let (mut walkers, resumed) = match restart {
            Some(c) => (c.walkers, Some((c.eshift, c.step, c.weight_factor))),
            None => (WalkerBatch::new(&system, &trial, config.qmc.nwalkers_per_task)?, None),
        };
        // a resumed run moves past the streams of every worker of the first run
        let step = resumed.map_or(0, |(_, step, _)| step);
        let offset = (step as u64).wrapping_mul(comm.size() as u64);
        let rng = RandomStream::new(seed.wrapping_add(offset), comm.rank());

        let population = PopulationController::new(
            config.walkers.population_control,
            config.walkers.min_weight,
            config.walkers.max_weight,
        );

        let echo = config.to_yaml()?;
        let setup = EstimatorSetup {
            system: &system,
            hamiltonian: &hamiltonian,
            trial: &trial,
            group: group.clone(),
            default_strategy: config.qmc.energy_strategy,
        };
        let estimators = EstimatorHandler::new(&config.estimates, &setup, comm.clone(), &echo)?;

        // the initial energy shift is the mixed energy of the starting walkers
        let energies = LocalEnergyEstimator::new(config.qmc.energy_strategy, group)
            .compute(&system, &hamiltonian, &walkers, &trial)?;
        let mut sums = [0.0, 0.0];
        for (iw, e) in energies.iter().enumerate() {
            walkers.local_energy[iw] = e.total;
            sums[0] += walkers.weight[iw] * e.total.re;
            sums[1] += walkers.weight[iw];
        }
        let global = comm.sum_reduce(&sums);
        let (eshift, weight_factor) = match resumed {
            Some((eshift, _, weight_factor)) => (eshift, weight_factor),
            None if global[1] > 0.0 => (global[0] / global[1], global[1]),
            None => (0.0, global[1]),
        };

        let timings = Timings { setup: start.elapsed(), ..Timings::default() };
        debug!("rank {}: setup done, eshift {:.8}", comm.rank(), eshift);
        Ok(Self {
            comm,
            config,
            system,
            hamiltonian,
            trial,
            walkers,
            propagator,
            population,
            estimators,
            rng,
            eshift,
            weight_factor,
            state: DriverState::Idle,
            step,
            records: Vec::new(),
            timings,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn eshift(&self) -> f64 {
        self.eshift
    }

    pub fn walkers(&self) -> &WalkerBatch {
        &self.walkers
    }

    pub fn estimators(&self) -> &EstimatorHandler {
        &self.estimators
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Reduced records of every written block, as seen by this worker.
    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }

    /// Steps completed, counting those of a restarted run.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            debug!("step {}: {:?} -> {:?}", self.step, self.state, next);
            self.state = next;
        }
    }

    pub fn run(&mut self, verbose: bool) -> Result<()> {
        let q = self.config.qmc.clone();
        let verbose = verbose && self.comm.is_root();
        if verbose {
            info!(
                "AFQMC: {} blocks of {} steps, dt {}, {} walkers on each of {} workers",
                q.blocks,
                q.steps,
                q.timestep,
                q.nwalkers_per_task,
                self.comm.size()
            );
            info!("initial energy shift {:.10}", self.eshift);
        }
        let cap_fraction = self.config.walkers.weight_cap_fraction;

        for block in 1..=q.blocks {
            let block_start = Instant::now();
            for _ in 0..q.steps {
                self.step += 1;
                let step = self.step;

                self.transition(DriverState::Propagating);
                let t = Instant::now();
                self.propagator.propagate(
                    &mut self.walkers,
                    &self.hamiltonian,
                    &self.trial,
                    self.eshift,
                    &mut self.rng,
                )?;
                if step > 1 {
                    let cap = cap_fraction * self.weight_factor;
                    for w in self.walkers.weight.iter_mut() {
                        *w = w.min(cap).max(0.0);
                    }
                }
                self.timings.propagate += t.elapsed();

                if step % q.stabilise_freq == 0 {
                    self.transition(DriverState::Stabilizing);
                    let t = Instant::now();
                    self.walkers.reortho();
                    self.timings.stabilise += t.elapsed();
                }

                if step % q.pop_control_freq == 0 {
                    self.transition(DriverState::PopulationControlling);
                    let t = Instant::now();
                    self.weight_factor =
                        self.population.pop_control(&mut self.walkers, self.comm.as_ref(), &mut self.rng);
                    self.timings.population += t.elapsed();
                }

                if self.estimators.is_due(step) {
                    self.transition(DriverState::Estimating);
                    let t = Instant::now();
                    let mut ctx = EstimatorContext {
                        system: &self.system,
                        hamiltonian: &self.hamiltonian,
                        trial: &self.trial,
                        walkers: &mut self.walkers,
                        weight_factor: self.weight_factor,
                        is_root: self.comm.is_root(),
                    };
                    self.estimators.compute_estimators(step, &mut ctx)?;
                    self.timings.estimate += t.elapsed();
                }
                self.transition(DriverState::Accumulating);
            }

            if let Some(record) = self.estimators.end_block(block)? {
                self.transition(DriverState::Writing);
                if let Some(e) = self.estimators.energy(&record) {
                    self.eshift = e.re;
                }
                if verbose {
                    let weight = self.estimators.field(&record, "energy/Weight").and_then(|v| v.first().copied());
                    info!(
                        "block {:>5}  weight {:>14.6}  energy {:>16.10}  ({:.2?})",
                        block,
                        weight.map_or(f64::NAN, |w| w.re),
                        self.eshift,
                        block_start.elapsed()
                    );
                }
                self.records.push(record);
            }
        }
        self.transition(DriverState::Finished);
        Ok(())
    }

    /// Write checkpoints when configured and report the run.
    pub fn finalise(&mut self, verbose: bool) -> Result<()> {
        if let Some(path) = self.config.qmc.checkpoint_path(self.comm.rank()) {
            let checkpoint = Checkpoint {
                walkers: self.walkers.clone(),
                eshift: self.eshift,
                step: self.step,
                weight_factor: self.weight_factor,
            };
            checkpoint.write(&path)?;
            debug!("rank {}: walkers written to {}", self.comm.rank(), path.display());
        }
        self.comm.barrier();
        if verbose && self.comm.is_root() {
            let t = &self.timings;
            info!("setup time {:.3?}", t.setup);
            info!(
                "propagation {:.3?}, stabilisation {:.3?}, population control {:.3?}, estimators {:.3?}",
                t.propagate, t.stabilise, t.population, t.estimate
            );
            if let Some(path) = self.estimators.output_path() {
                info!("estimates written to {}", path.display());
            }
        }
        Ok(())
    }
}
