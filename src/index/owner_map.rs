//! Contiguous per-rank partition of the global node index space.
//!
//! Rank `r` owns the half-open range `[owner_range[r], owner_range[r+1])`.
//! The partition is immutable once constructed; every vector and plan built
//! against it holds a shared handle.

use std::ops::Range;
use std::sync::Arc;

use crate::comm::collective::allgather_u64;
use crate::comm::communicator::{CommTag, Communicator};
use crate::error::BlockVecError;

const GATHER_TAG: CommTag = CommTag::new(0x4D01);

/// Ownership partition plus the communicator it is distributed over.
#[derive(Debug)]
pub struct OwnerMap<C> {
    comm: Arc<C>,
    owner_range: Vec<i64>,
}

impl<C: Communicator> OwnerMap<C> {
    /// Build from an explicit range array `owner_range[0..=P]`.
    pub fn new(comm: Arc<C>, owner_range: Vec<i64>) -> Result<Self, BlockVecError> {
        if owner_range.len() != comm.size() + 1 {
            return Err(BlockVecError::InvalidOwnerRange(format!(
                "expected {} entries for {} ranks, got {}",
                comm.size() + 1,
                comm.size(),
                owner_range.len()
            )));
        }
        if owner_range[0] != 0 {
            return Err(BlockVecError::InvalidOwnerRange(format!(
                "range must start at 0, got {}",
                owner_range[0]
            )));
        }
        if owner_range.windows(2).any(|w| w[1] < w[0]) {
            return Err(BlockVecError::InvalidOwnerRange(
                "range must be non-decreasing".into(),
            ));
        }
        Ok(Self { comm, owner_range })
    }

    /// Build collectively from this rank's owned node count.
    ///
    /// Gathers every rank's count and prefix-sums them into the range array,
    /// so all ranks end up with an identical partition.
    pub fn from_local_count(comm: Arc<C>, owned: usize) -> Result<Self, BlockVecError> {
        let counts = allgather_u64(comm.as_ref(), owned as u64, GATHER_TAG)?;
        let mut owner_range = Vec::with_capacity(counts.len() + 1);
        owner_range.push(0i64);
        for c in counts {
            let last = *owner_range.last().expect("range non-empty");
            owner_range.push(last + c as i64);
        }
        Self::new(comm, owner_range)
    }

    /// The raw range array, `P + 1` entries.
    #[inline]
    pub fn owner_range(&self) -> &[i64] {
        &self.owner_range
    }

    /// The communicator this partition is distributed over.
    #[inline]
    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    /// Rank of this process.
    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Number of ranks.
    #[inline]
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Global nodes owned by `rank`.
    #[inline]
    pub fn owned_range(&self, rank: usize) -> Range<i64> {
        self.owner_range[rank]..self.owner_range[rank + 1]
    }

    /// Number of nodes owned by `rank`.
    #[inline]
    pub fn owned_count(&self, rank: usize) -> usize {
        (self.owner_range[rank + 1] - self.owner_range[rank]) as usize
    }

    /// Total number of global nodes.
    #[inline]
    pub fn global_len(&self) -> i64 {
        *self.owner_range.last().expect("range non-empty")
    }

    /// Owning rank of global node `g`, or `None` when out of range.
    pub fn owner_of(&self, g: i64) -> Option<usize> {
        if g < 0 || g >= self.global_len() {
            return None;
        }
        // Index of the last range start <= g. Empty ranks resolve to the
        // highest rank whose range actually contains g.
        let r = self.owner_range.partition_point(|&start| start <= g) - 1;
        Some(r)
    }

    /// Whether `rank` owns global node `g`.
    #[inline]
    pub fn owns(&self, rank: usize, g: i64) -> bool {
        self.owned_range(rank).contains(&g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, ThreadComm};

    #[test]
    fn validates_shape() {
        let comm = Arc::new(NoComm);
        assert!(OwnerMap::new(comm.clone(), vec![0, 4]).is_ok());
        assert!(matches!(
            OwnerMap::new(comm.clone(), vec![0, 4, 8]),
            Err(BlockVecError::InvalidOwnerRange(_))
        ));
        assert!(matches!(
            OwnerMap::new(comm.clone(), vec![1, 4]),
            Err(BlockVecError::InvalidOwnerRange(_))
        ));
        assert!(matches!(
            OwnerMap::new(comm, vec![0, -1]),
            Err(BlockVecError::InvalidOwnerRange(_))
        ));
    }

    #[test]
    fn owner_lookup_single_rank() {
        let comm = Arc::new(NoComm);
        let map = OwnerMap::new(comm, vec![0, 6]).unwrap();
        assert_eq!(map.owner_of(0), Some(0));
        assert_eq!(map.owner_of(5), Some(0));
        assert_eq!(map.owner_of(6), None);
        assert_eq!(map.owner_of(-1), None);
        assert_eq!(map.owned_count(0), 6);
        assert_eq!(map.global_len(), 6);
    }

    #[test]
    fn from_local_count_builds_consistent_ranges() {
        let worlds = ThreadComm::world(3);
        let mut handles = Vec::new();
        for comm in worlds {
            handles.push(std::thread::spawn(move || {
                let owned = [2usize, 0, 3][comm.rank()];
                let map = OwnerMap::from_local_count(Arc::new(comm), owned).unwrap();
                map.owner_range().to_vec()
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![0, 2, 2, 5]);
        }
    }

    #[test]
    fn empty_middle_rank_owns_nothing() {
        let worlds = ThreadComm::world(3);
        let mut handles = Vec::new();
        for comm in worlds {
            handles.push(std::thread::spawn(move || {
                let owned = [2usize, 0, 3][comm.rank()];
                let map = OwnerMap::from_local_count(Arc::new(comm), owned).unwrap();
                // Node 2 belongs to rank 2, not the empty rank 1.
                assert_eq!(map.owner_of(2), Some(2));
                assert_eq!(map.owner_of(1), Some(0));
                assert_eq!(map.owned_count(1), 0);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
