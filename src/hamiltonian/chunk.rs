//! Contiguous split of the Cholesky rank dimension over the members of a group.

use serde::{Deserialize, Serialize};

use crate::comm::WorkerGrouping;

/// Which block of Cholesky vectors a group member owns.
///
/// The first `nchol % nmembers` blocks hold one extra vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub nchol: usize,
    pub nmembers: usize,
    pub member: usize,
}

impl ChunkLayout {
    pub fn new(nchol: usize, grouping: &WorkerGrouping) -> Self {
        Self { nchol, nmembers: grouping.nmembers, member: grouping.member() }
    }

    /// Half-open range of vectors owned by `member`.
    pub fn range_of(&self, member: usize) -> std::ops::Range<usize> {
        let base = self.nchol / self.nmembers;
        let extra = self.nchol % self.nmembers;
        let start = member * base + member.min(extra);
        let len = base + usize::from(member < extra);
        start..start + len
    }

    pub fn local_range(&self) -> std::ops::Range<usize> {
        self.range_of(self.member)
    }

    pub fn local_len(&self) -> usize {
        self.local_range().len()
    }
}
