//! Distributed-memory collaborators: collectives, worker grouping and random streams.
//!
//! Workers communicate only through the blocking collectives of [`Communicator`].
//! Every worker of a communicator must call the same collectives in the same
//! order; a worker that never reaches a collective stalls the others.

#[cfg(feature = "mpi")]
mod process;
mod thread;

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AfqmcError, Result};

#[cfg(feature = "mpi")]
pub use process::MpiComm;
pub use thread::ThreadComm;

pub trait Communicator: fmt::Debug + Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Gather a byte buffer from every worker, in rank order.
    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>>;

    /// Split into sub-communicators of the workers sharing `color`.
    /// Ranks in the new communicator follow the parent ordering.
    fn split(&self, color: usize) -> Result<Arc<dyn Communicator>>;

    fn barrier(&self);

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Gather a variable-length `f64` buffer from every worker.
    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>> {
        let bytes: Vec<u8> = local.iter().flat_map(|x| x.to_le_bytes()).collect();
        self.all_gather_bytes(&bytes)
            .into_iter()
            .map(|b| {
                b.chunks_exact(8)
                    .map(|c| {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(c);
                        f64::from_le_bytes(raw)
                    })
                    .collect()
            })
            .collect()
    }

    /// Element-wise sum over all workers. Summation follows rank order so every
    /// worker obtains bitwise identical results.
    fn sum_reduce(&self, local: &[f64]) -> Vec<f64> {
        let gathered = self.all_gather(local);
        let mut global = vec![0.0; local.len()];
        for buffer in gathered.iter() {
            for (g, x) in global.iter_mut().zip(buffer.iter()) {
                *g += x;
            }
        }
        global
    }

    /// Distribute the root's bytes to every worker.
    fn broadcast_bytes(&self, bytes: &[u8], root: usize) -> Vec<u8> {
        let local = if self.rank() == root { bytes } else { &[] };
        self.all_gather_bytes(local).swap_remove(root)
    }
}

/// Single worker communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        vec![local.to_vec()]
    }

    fn split(&self, _color: usize) -> Result<Arc<dyn Communicator>> {
        Ok(Arc::new(SerialComm))
    }

    fn barrier(&self) {}
}

/// Broadcast a serialisable value from `root` to every worker.
pub fn broadcast<T>(comm: &dyn Communicator, value: &mut T, root: usize) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let bytes = if comm.rank() == root {
        bincode::serialize(value)?
    } else {
        Vec::new()
    };
    let received = comm.broadcast_bytes(&bytes, root);
    if comm.rank() != root {
        *value = bincode::deserialize(&received)?;
    }
    Ok(())
}

/// Agree on a success flag raised by the coordinating worker.
///
/// Every worker returns an error when the coordinator failed, otherwise `Ok`.
pub fn coordinator_status(comm: &dyn Communicator, outcome: std::result::Result<(), String>) -> Result<()> {
    let mut message = match (&outcome, comm.is_root()) {
        (Err(e), true) => Some(e.clone()),
        _ => None,
    };
    broadcast(comm, &mut message, 0)?;
    match message {
        Some(e) => Err(AfqmcError::CoordinatorIo(e)),
        None => Ok(()),
    }
}

/// Position of a worker in the chunking groups.
///
/// Consecutive ranks form a group of `nmembers` workers; each member owns one
/// block of the Cholesky rank dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerGrouping {
    pub rank: usize,
    pub size: usize,
    pub nmembers: usize,
}

impl WorkerGrouping {
    pub fn new(rank: usize, size: usize, nmembers: usize) -> Result<Self> {
        if nmembers == 0 || size % nmembers != 0 {
            return Err(AfqmcError::InvalidGrouping(format!(
                "{} workers cannot be split into groups of {}",
                size, nmembers
            )));
        }
        if rank >= size {
            return Err(AfqmcError::InvalidGrouping(format!("rank {} out of range for {} workers", rank, size)));
        }
        Ok(Self { rank, size, nmembers })
    }

    pub fn from_comm(comm: &dyn Communicator, nmembers: usize) -> Result<Self> {
        Self::new(comm.rank(), comm.size(), nmembers)
    }

    pub fn group(&self) -> usize {
        self.rank / self.nmembers
    }

    pub fn member(&self) -> usize {
        self.rank % self.nmembers
    }

    pub fn ngroups(&self) -> usize {
        self.size / self.nmembers
    }
}

/// Per-worker random stream, passed explicitly to every stochastic call.
#[derive(Debug, Clone)]
pub struct RandomStream {
    rng: StdRng,
}

impl RandomStream {
    /// Stream for worker `rank` of a run seeded with `seed`.
    pub fn new(seed: u64, rank: usize) -> Self {
        Self { rng: StdRng::seed_from_u64(seed.wrapping_add(rank as u64)) }
    }

    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub fn normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_requires_divisible_world() {
        assert!(WorkerGrouping::new(0, 3, 2).is_err());
        let g = WorkerGrouping::new(5, 6, 3).unwrap();
        assert_eq!(g.group(), 1);
        assert_eq!(g.member(), 2);
        assert_eq!(g.ngroups(), 2);
    }

    #[test]
    fn test_serial_collectives_are_identity() {
        let comm = SerialComm;
        assert_eq!(comm.sum_reduce(&[1.0, 2.5]), vec![1.0, 2.5]);
        let mut value = vec![3_u32, 4];
        broadcast(&comm, &mut value, 0).unwrap();
        assert_eq!(value, vec![3, 4]);
        assert!(coordinator_status(&comm, Ok(())).is_ok());
        assert!(matches!(
            coordinator_status(&comm, Err("disk full".to_string())),
            Err(AfqmcError::CoordinatorIo(_))
        ));
    }

    #[test]
    fn test_random_streams_differ_per_rank_and_repeat_per_seed() {
        let mut a = RandomStream::new(7, 0);
        let mut b = RandomStream::new(7, 1);
        let mut c = RandomStream::new(7, 0);
        let xa: Vec<f64> = (0..4).map(|_| a.normal()).collect();
        let xb: Vec<f64> = (0..4).map(|_| b.normal()).collect();
        let xc: Vec<f64> = (0..4).map(|_| c.normal()).collect();
        assert_eq!(xa, xc);
        assert_ne!(xa, xb);
    }
}
