//! In-process communicator: every worker is a thread sharing one exchange area.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use super::Communicator;
use crate::error::Result;

#[derive(Debug)]
struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
    children: Mutex<HashMap<(u64, usize), Arc<Shared>>>,
}

impl Shared {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
            children: Mutex::new(HashMap::new()),
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A worker of an in-process world, moved into its own thread.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
    splits: AtomicU64,
}

impl ThreadComm {
    /// Create the `size` workers of a new world, ordered by rank.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        let shared = Shared::new(size.max(1));
        (0..size.max(1))
            .map(|rank| ThreadComm { rank, shared: Arc::clone(&shared), splits: AtomicU64::new(0) })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        lock(&self.shared.slots)[self.rank] = local.to_vec();
        self.shared.barrier.wait();
        let gathered = lock(&self.shared.slots).clone();
        // nobody may overwrite a slot before every worker has read it
        self.shared.barrier.wait();
        gathered
    }

    fn split(&self, color: usize) -> Result<Arc<dyn Communicator>> {
        let tag = (color as u64).to_le_bytes();
        let colors = self.all_gather_bytes(&tag);
        let key = self.splits.fetch_add(1, Ordering::SeqCst);
        let same: Vec<usize> = colors
            .iter()
            .enumerate()
            .filter(|(_, c)| c[..] == tag[..])
            .map(|(r, _)| r)
            .collect();
        let rank = same.iter().position(|&r| r == self.rank).unwrap_or(0);
        let shared = Arc::clone(
            lock(&self.shared.children)
                .entry((key, color))
                .or_insert_with(|| Shared::new(same.len())),
        );
        Ok(Arc::new(ThreadComm { rank, shared, splits: AtomicU64::new(0) }))
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::broadcast;

    #[test]
    fn test_collectives_agree_across_threads() {
        let workers = ThreadComm::create(4);
        let results: Vec<(Vec<f64>, String, usize, Vec<f64>)> = std::thread::scope(|s| {
            let handles: Vec<_> = workers
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let total = comm.sum_reduce(&[comm.rank() as f64, 1.0]);
                        let mut label = if comm.is_root() { "root".to_string() } else { String::new() };
                        broadcast(&comm, &mut label, 0).unwrap();
                        let sub = comm.split(comm.rank() / 2).unwrap();
                        let partial = sub.sum_reduce(&[comm.rank() as f64]);
                        (total, label, sub.rank(), partial)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, (total, label, sub_rank, partial)) in results.iter().enumerate() {
            assert_eq!(total, &vec![6.0, 4.0]);
            assert_eq!(label, "root");
            assert_eq!(*sub_rank, rank % 2);
            let expected = if rank < 2 { 1.0 } else { 5.0 };
            assert_eq!(partial, &vec![expected]);
        }
    }

    #[test]
    fn test_gather_preserves_rank_order_and_lengths() {
        let workers = ThreadComm::create(3);
        let gathered: Vec<Vec<Vec<f64>>> = std::thread::scope(|s| {
            let handles: Vec<_> = workers
                .into_iter()
                .map(|comm| s.spawn(move || comm.all_gather(&vec![comm.rank() as f64; comm.rank() + 1])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for g in gathered.iter() {
            assert_eq!(g.len(), 3);
            for (r, buf) in g.iter().enumerate() {
                assert_eq!(buf, &vec![r as f64; r + 1]);
            }
        }
    }
}
