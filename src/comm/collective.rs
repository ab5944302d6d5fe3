//! Collective operations composed from the point-to-point layer.
//!
//! Every backend gets these for free: the reduction gathers partials at rank
//! 0 (combined in ascending rank order, which fixes the reduction tree for a
//! given rank count) and rebroadcasts the result. All functions here are
//! collective: every rank of the communicator must call them in the same
//! global order with consistent arguments.

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::error::BlockVecError;
use crate::Scalar;

const ROOT: usize = 0;

fn short_recv(neighbor: usize, expected: usize, got: usize) -> BlockVecError {
    BlockVecError::BufferSizeMismatch {
        neighbor,
        expected,
        got,
    }
}

fn lost_recv(neighbor: usize) -> BlockVecError {
    BlockVecError::CommError {
        neighbor,
        reason: "receive completed without data".into(),
    }
}

/// Broadcast `buf` from `root` to every rank, in place.
pub fn broadcast_bytes<C: Communicator>(
    comm: &C,
    root: usize,
    buf: &mut [u8],
    tag: CommTag,
) -> Result<(), BlockVecError> {
    if comm.size() <= 1 {
        return Ok(());
    }
    if comm.rank() == root {
        let mut pending = Vec::with_capacity(comm.size() - 1);
        for peer in 0..comm.size() {
            if peer != root {
                pending.push(comm.isend(peer, tag.as_u16(), buf));
            }
        }
        for send in pending {
            let _ = send.wait();
        }
    } else {
        let h = comm.irecv(root, tag.as_u16(), buf);
        let data = h.wait().ok_or_else(|| lost_recv(root))?;
        if data.len() != buf.len() {
            return Err(short_recv(root, buf.len(), data.len()));
        }
        buf.copy_from_slice(&data);
    }
    Ok(())
}

/// Sum `vals` elementwise across all ranks, in place on every rank.
///
/// Rank 0 combines the partials in ascending rank order, so the result is
/// reproducible for a fixed rank count (floating-point sums are not
/// associative across different rank counts).
pub fn allreduce_sum<C: Communicator>(
    comm: &C,
    vals: &mut [Scalar],
    tag: CommTag,
) -> Result<(), BlockVecError> {
    if comm.size() <= 1 {
        return Ok(());
    }
    let bcast_tag = tag.offset(1);
    if comm.rank() == ROOT {
        let mut pending = Vec::with_capacity(comm.size() - 1);
        for peer in 1..comm.size() {
            let mut buf = vec![0.0 as Scalar; vals.len()];
            let h = comm.irecv(peer, tag.as_u16(), cast_slice_mut(&mut buf));
            pending.push((peer, h, buf));
        }
        for (peer, h, mut buf) in pending {
            let raw = h.wait().ok_or_else(|| lost_recv(peer))?;
            let expected = std::mem::size_of_val(&buf[..]);
            if raw.len() != expected {
                return Err(short_recv(peer, expected, raw.len()));
            }
            cast_slice_mut(&mut buf).copy_from_slice(&raw);
            for (acc, part) in vals.iter_mut().zip(&buf) {
                *acc += *part;
            }
        }
    } else {
        let send = comm.isend(ROOT, tag.as_u16(), cast_slice(vals));
        let _ = send.wait();
    }
    // Rebroadcast the combined result.
    let bytes = cast_slice_mut(vals);
    broadcast_bytes(comm, ROOT, bytes, bcast_tag)
}

/// Gather one `u64` per rank; every rank receives the full vector, indexed
/// by rank.
pub fn allgather_u64<C: Communicator>(
    comm: &C,
    value: u64,
    tag: CommTag,
) -> Result<Vec<u64>, BlockVecError> {
    let size = comm.size();
    let rank = comm.rank();
    let mut out = vec![0u64; size];
    out[rank] = value;
    if size <= 1 {
        return Ok(out);
    }

    let mut pending = Vec::with_capacity(size - 1);
    for peer in 0..size {
        if peer != rank {
            let mut buf = [0u8; 8];
            let h = comm.irecv(peer, tag.as_u16(), &mut buf);
            pending.push((peer, h));
        }
    }
    let mut sends = Vec::with_capacity(size - 1);
    for peer in 0..size {
        if peer != rank {
            sends.push(comm.isend(peer, tag.as_u16(), &value.to_le_bytes()));
        }
    }
    for (peer, h) in pending {
        let raw = h.wait().ok_or_else(|| lost_recv(peer))?;
        if raw.len() != 8 {
            return Err(short_recv(peer, 8, raw.len()));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&raw);
        out[peer] = u64::from_le_bytes(word);
    }
    for send in sends {
        let _ = send.wait();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, ThreadComm};

    #[test]
    fn single_rank_collectives_are_identity() {
        let comm = NoComm;
        let mut vals = [1.0, 2.0];
        allreduce_sum(&comm, &mut vals, CommTag::new(0x100)).unwrap();
        assert_eq!(vals, [1.0, 2.0]);

        let mut buf = [9u8; 3];
        broadcast_bytes(&comm, 0, &mut buf, CommTag::new(0x101)).unwrap();
        assert_eq!(buf, [9, 9, 9]);

        assert_eq!(allgather_u64(&comm, 7, CommTag::new(0x102)).unwrap(), [7]);
    }

    #[test]
    fn allreduce_sums_across_three_ranks() {
        let worlds = ThreadComm::world(3);
        let mut handles = Vec::new();
        for comm in worlds {
            handles.push(std::thread::spawn(move || {
                let r = comm.rank() as Scalar;
                let mut vals = [r, 10.0 * r];
                allreduce_sum(&comm, &mut vals, CommTag::new(0x200)).unwrap();
                vals
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), [3.0, 30.0]);
        }
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let worlds = ThreadComm::world(3);
        let mut handles = Vec::new();
        for comm in worlds {
            handles.push(std::thread::spawn(move || {
                let mut buf = if comm.rank() == 0 {
                    [1u8, 2, 3, 4]
                } else {
                    [0u8; 4]
                };
                broadcast_bytes(&comm, 0, &mut buf, CommTag::new(0x300)).unwrap();
                buf
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), [1, 2, 3, 4]);
        }
    }

    #[test]
    fn allgather_orders_by_rank() {
        let worlds = ThreadComm::world(4);
        let mut handles = Vec::new();
        for comm in worlds {
            handles.push(std::thread::spawn(move || {
                allgather_u64(&comm, 100 + comm.rank() as u64, CommTag::new(0x400)).unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![100, 101, 102, 103]);
        }
    }
}
