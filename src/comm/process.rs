//! Message-passing communicator: one process per worker.

use std::fmt;
use std::sync::Arc;

use mpi::datatype::PartitionMut;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use mpi::Count;

use super::Communicator;
use crate::error::{AfqmcError, Result};

pub struct MpiComm {
    comm: SimpleCommunicator,
}

// SAFETY: collectives are only issued by the thread driving the simulation.
unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }

    /// The world communicator of an initialised universe.
    pub fn world(universe: &mpi::environment::Universe) -> Self {
        Self::new(universe.world())
    }
}

impl fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpiComm")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .finish()
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        let nranks = self.size();

        // exchange the byte counts first, then the payloads
        let send_count = local.len() as Count;
        let mut counts = vec![0 as Count; nranks];
        self.comm.all_gather_into(&send_count, &mut counts[..]);

        let mut displs = vec![0 as Count; nranks];
        for i in 1..nranks {
            displs[i] = displs[i - 1] + counts[i - 1];
        }
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut buffer = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut buffer[..], &counts[..], &displs[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
        }

        counts
            .iter()
            .zip(displs.iter())
            .map(|(&c, &d)| buffer[d as usize..(d + c) as usize].to_vec())
            .collect()
    }

    fn split(&self, color: usize) -> Result<Arc<dyn Communicator>> {
        let color = Count::try_from(color)
            .map_err(|_| AfqmcError::InvalidGrouping(format!("group colour {} is out of range", color)))?;
        let sub = self
            .comm
            .split_by_color(Color::with_value(color))
            .ok_or_else(|| AfqmcError::Communicator(format!("split by colour {} failed", color)))?;
        Ok(Arc::new(MpiComm::new(sub)))
    }

    fn barrier(&self) {
        self.comm.barrier();
    }
}
