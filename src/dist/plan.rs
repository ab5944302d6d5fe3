//! Precomputed schedule for exchanging the ghost region with peer ranks.
//!
//! The plan records two schedules over the same pairing of nodes:
//! - *forward* (owners broadcast to ghosts): this rank sends blocks of its
//!   owned nodes to every peer that ghosts them, and receives one block per
//!   ghost slot from the owning rank;
//! - *reverse* (ghosts combine into owners): the same messages flow the
//!   other way, and incoming blocks are combined into the owned array with
//!   the caller's [`AssemblyOp`].
//!
//! Because the ghost indices are sorted and the ownership ranges are
//! contiguous, the ghosts owned by one peer form a single run of the ghost
//! buffer; the owner side keeps an explicit offset list per peer, in the
//! same order the peer's run uses, so block order matches on both sides.

use std::ops::Range;
use std::sync::Arc;

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::comm::wire::{cast_slice, cast_slice_mut, WireCount};
use crate::dist::context::{CtxPhase, DistContext, PendingRecv};
use crate::error::BlockVecError;
use crate::index::{GhostIndexSet, OwnerMap};
use crate::vec::AssemblyOp;
use crate::Scalar;

const TAG_PLAN_SIZES: CommTag = CommTag::new(0x7A00);
const TAG_PLAN_INDICES: CommTag = CommTag::new(0x7A02);
const TAG_FORWARD: CommTag = CommTag::new(0x7A10);
const TAG_REVERSE: CommTag = CommTag::new(0x7A12);

/// Forward/reverse exchange schedule between this rank and its peers.
pub struct DistPlan<C: Communicator> {
    comm: Arc<C>,
    ghosts: Arc<GhostIndexSet>,
    /// Per owning peer, the run of ghost slots it owns. Ascending peer order.
    ghost_runs: Vec<(usize, Range<usize>)>,
    /// Per ghosting peer, the owned node offsets it shadows, in the peer's
    /// ghost order. Ascending peer order.
    owner_blocks: Vec<(usize, Vec<usize>)>,
}

impl<C: Communicator> DistPlan<C> {
    /// Build the schedule collectively. Every rank must call this with the
    /// same owner map; the ghost sets are rank-local.
    pub fn build(map: &OwnerMap<C>, ghosts: Arc<GhostIndexSet>) -> Result<Self, BlockVecError> {
        let comm = map.comm().clone();
        let rank = comm.rank();
        let size = comm.size();

        // Bucket the sorted ghost list into per-owner runs.
        let mut ghost_runs: Vec<(usize, Range<usize>)> = Vec::new();
        {
            let idx = ghosts.indices();
            let mut start = 0;
            while start < idx.len() {
                let g = idx[start];
                let owner = map
                    .owner_of(g)
                    .ok_or(BlockVecError::IndexOutOfRange(g))?;
                if owner == rank {
                    return Err(BlockVecError::GhostInOwnedRange(g, rank));
                }
                let hi = map.owned_range(owner).end;
                let mut end = start + 1;
                while end < idx.len() && idx[end] < hi {
                    end += 1;
                }
                ghost_runs.push((owner, start..end));
                start = end;
            }
        }

        if size <= 1 {
            return Ok(Self {
                comm,
                ghosts,
                ghost_runs,
                owner_blocks: Vec::new(),
            });
        }

        // Stage 1: symmetric count exchange with every other rank.
        let mut counts_to = vec![0u32; size];
        for (peer, run) in &ghost_runs {
            counts_to[*peer] = run.len() as u32;
        }
        let mut pending_counts = Vec::with_capacity(size - 1);
        for peer in 0..size {
            if peer != rank {
                let mut word = [0u8; 4];
                let h = comm.irecv(peer, TAG_PLAN_SIZES.as_u16(), &mut word);
                pending_counts.push((peer, h));
            }
        }
        let mut count_sends = Vec::with_capacity(size - 1);
        for peer in 0..size {
            if peer != rank {
                let wire = WireCount::new(counts_to[peer] as usize);
                count_sends.push(comm.isend(
                    peer,
                    TAG_PLAN_SIZES.as_u16(),
                    cast_slice(std::slice::from_ref(&wire)),
                ));
            }
        }
        let mut incoming = vec![0usize; size];
        for (peer, h) in pending_counts {
            let raw = h.wait().ok_or_else(|| BlockVecError::CommError {
                neighbor: peer,
                reason: "count exchange returned no data".into(),
            })?;
            let mut cnt = WireCount::new(0);
            let bytes = cast_slice_mut(std::slice::from_mut(&mut cnt));
            if raw.len() != bytes.len() {
                return Err(BlockVecError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: bytes.len(),
                    got: raw.len(),
                });
            }
            bytes.copy_from_slice(&raw);
            incoming[peer] = cnt.get();
        }
        for send in count_sends {
            let _ = send.wait();
        }

        // Stage 2: ship the ghosted global indices to their owners.
        let mut pending_idx = Vec::new();
        for (peer, &n) in incoming.iter().enumerate() {
            if n > 0 {
                let mut buf = vec![0i64; n];
                let h = comm.irecv(peer, TAG_PLAN_INDICES.as_u16(), cast_slice_mut(&mut buf));
                pending_idx.push((peer, h, buf));
            }
        }
        let mut idx_sends = Vec::with_capacity(ghost_runs.len());
        for (peer, run) in &ghost_runs {
            idx_sends.push(comm.isend(
                *peer,
                TAG_PLAN_INDICES.as_u16(),
                cast_slice(&ghosts.indices()[run.clone()]),
            ));
        }
        let own = map.owned_range(rank);
        let mut owner_blocks = Vec::with_capacity(pending_idx.len());
        for (peer, h, mut buf) in pending_idx {
            let raw = h.wait().ok_or_else(|| BlockVecError::CommError {
                neighbor: peer,
                reason: "index exchange returned no data".into(),
            })?;
            let expected = std::mem::size_of_val(&buf[..]);
            if raw.len() != expected {
                return Err(BlockVecError::BufferSizeMismatch {
                    neighbor: peer,
                    expected,
                    got: raw.len(),
                });
            }
            cast_slice_mut(&mut buf).copy_from_slice(&raw);
            let mut offsets = Vec::with_capacity(buf.len());
            for &g in &buf {
                if !own.contains(&g) {
                    return Err(BlockVecError::CommError {
                        neighbor: peer,
                        reason: format!("peer ghosts node {g} that rank {rank} does not own"),
                    });
                }
                offsets.push((g - own.start) as usize);
            }
            owner_blocks.push((peer, offsets));
        }
        for send in idx_sends {
            let _ = send.wait();
        }
        owner_blocks.sort_unstable_by_key(|(peer, _)| *peer);

        Ok(Self {
            comm,
            ghosts,
            ghost_runs,
            owner_blocks,
        })
    }

    /// Number of ghost nodes the plan covers.
    #[inline]
    pub fn size(&self) -> usize {
        self.ghosts.len()
    }

    /// The ghost index set the plan was built for.
    #[inline]
    pub fn indices(&self) -> &Arc<GhostIndexSet> {
        &self.ghosts
    }

    /// Peer ranks this rank exchanges with, ascending, deduplicated.
    pub fn neighbor_ranks(&self) -> Vec<usize> {
        let mut peers: Vec<usize> = self
            .ghost_runs
            .iter()
            .map(|(p, _)| *p)
            .chain(self.owner_blocks.iter().map(|(p, _)| *p))
            .collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    /// Create the per-vector scratch for block size `bsize`.
    pub fn create_context(&self, bsize: usize) -> DistContext<C> {
        DistContext::new(bsize)
    }

    /// Initiate the owners-to-ghosts broadcast: post receives for every
    /// ghost run and send the owned blocks each peer shadows.
    pub fn begin_forward(
        &self,
        ctx: &mut DistContext<C>,
        local: &[Scalar],
    ) -> Result<(), BlockVecError> {
        ctx.enter(CtxPhase::Forward)?;
        let b = ctx.bsize;
        for (slot, (peer, run)) in self.ghost_runs.iter().enumerate() {
            let mut buf = vec![0.0 as Scalar; run.len() * b];
            let handle = self
                .comm
                .irecv(*peer, TAG_FORWARD.as_u16(), cast_slice_mut(&mut buf));
            ctx.pending_recvs.push(PendingRecv {
                peer: *peer,
                slot,
                buf,
                handle,
            });
        }
        for (peer, offsets) in &self.owner_blocks {
            let mut out = Vec::with_capacity(offsets.len() * b);
            for &node in offsets {
                out.extend_from_slice(&local[b * node..b * (node + 1)]);
            }
            ctx.pending_sends
                .push(self.comm.isend(*peer, TAG_FORWARD.as_u16(), cast_slice(&out)));
        }
        Ok(())
    }

    /// Complete the forward exchange, overwriting the ghost runs with the
    /// owners' blocks.
    pub fn end_forward(
        &self,
        ctx: &mut DistContext<C>,
        ghost: &mut [Scalar],
    ) -> Result<(), BlockVecError> {
        ctx.expect(CtxPhase::Forward)?;
        let b = ctx.bsize;
        for pr in ctx.pending_recvs.drain(..) {
            let PendingRecv {
                peer,
                slot,
                mut buf,
                handle,
            } = pr;
            let raw = handle.wait().ok_or_else(|| BlockVecError::CommError {
                neighbor: peer,
                reason: "forward exchange returned no data".into(),
            })?;
            let expected = std::mem::size_of_val(&buf[..]);
            if raw.len() != expected {
                return Err(BlockVecError::BufferSizeMismatch {
                    neighbor: peer,
                    expected,
                    got: raw.len(),
                });
            }
            cast_slice_mut(&mut buf).copy_from_slice(&raw);
            let (_, run) = &self.ghost_runs[slot];
            ghost[b * run.start..b * run.end].copy_from_slice(&buf);
        }
        for send in ctx.pending_sends.drain(..) {
            let _ = send.wait();
        }
        ctx.phase = CtxPhase::Idle;
        Ok(())
    }

    /// Initiate the ghosts-to-owners combine: post receives for every peer
    /// that ghosts our nodes and send our ghost runs to their owners.
    pub fn begin_reverse(
        &self,
        ctx: &mut DistContext<C>,
        ghost: &[Scalar],
        _op: AssemblyOp,
    ) -> Result<(), BlockVecError> {
        ctx.enter(CtxPhase::Reverse)?;
        let b = ctx.bsize;
        for (slot, (peer, offsets)) in self.owner_blocks.iter().enumerate() {
            let mut buf = vec![0.0 as Scalar; offsets.len() * b];
            let handle = self
                .comm
                .irecv(*peer, TAG_REVERSE.as_u16(), cast_slice_mut(&mut buf));
            ctx.pending_recvs.push(PendingRecv {
                peer: *peer,
                slot,
                buf,
                handle,
            });
        }
        for (peer, run) in &self.ghost_runs {
            ctx.pending_sends.push(self.comm.isend(
                *peer,
                TAG_REVERSE.as_u16(),
                cast_slice(&ghost[b * run.start..b * run.end]),
            ));
        }
        Ok(())
    }

    /// Complete the reverse exchange, combining incoming blocks into the
    /// owned array with `op`. Peers are combined in ascending rank order, so
    /// `Add` results are reproducible and `Insert` deterministically keeps
    /// the highest-ranked writer (callers must not rely on which).
    pub fn end_reverse(
        &self,
        ctx: &mut DistContext<C>,
        local: &mut [Scalar],
        op: AssemblyOp,
    ) -> Result<(), BlockVecError> {
        ctx.expect(CtxPhase::Reverse)?;
        let b = ctx.bsize;
        for pr in ctx.pending_recvs.drain(..) {
            let PendingRecv {
                peer,
                slot,
                mut buf,
                handle,
            } = pr;
            let raw = handle.wait().ok_or_else(|| BlockVecError::CommError {
                neighbor: peer,
                reason: "reverse exchange returned no data".into(),
            })?;
            let expected = std::mem::size_of_val(&buf[..]);
            if raw.len() != expected {
                return Err(BlockVecError::BufferSizeMismatch {
                    neighbor: peer,
                    expected,
                    got: raw.len(),
                });
            }
            cast_slice_mut(&mut buf).copy_from_slice(&raw);
            let (_, offsets) = &self.owner_blocks[slot];
            for (i, &node) in offsets.iter().enumerate() {
                let dst = &mut local[b * node..b * (node + 1)];
                let src = &buf[b * i..b * (i + 1)];
                match op {
                    AssemblyOp::Add => {
                        for (d, s) in dst.iter_mut().zip(src) {
                            *d += *s;
                        }
                    }
                    AssemblyOp::Insert => dst.copy_from_slice(src),
                }
            }
        }
        for send in ctx.pending_sends.drain(..) {
            let _ = send.wait();
        }
        ctx.phase = CtxPhase::Idle;
        Ok(())
    }
}
