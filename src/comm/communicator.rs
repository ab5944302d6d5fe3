//! Message-passing abstraction for intra-process (threaded) and
//! inter-process (MPI) execution.
//!
//! Every routine in this crate that talks to peers is written against the
//! [`Communicator`] trait, so the same vector code runs single-rank
//! ([`NoComm`]), one-thread-per-rank in a test harness ([`ThreadComm`]), or
//! across processes (`MpiComm`, behind the `mpi-support` feature).
//!
//! Wire conventions for the higher-level protocols: integer headers are
//! little-endian fixed width; receivers may truncate to their posted buffer
//! length, so layers that need exact lengths exchange sizes first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received bytes (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`. The buffer is copied; the handle only
    /// tracks completion.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive from `peer`. `buf` fixes the maximum accepted length;
    /// the data itself is returned by [`Wait::wait`].
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process (`0..size`).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (no-op for single-rank communicators).
    fn barrier(&self) {}
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- ThreadComm: intra-process, one thread per rank ---

type MailKey = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct BarrierState {
    arrived: usize,
    epoch: u64,
}

/// State shared by every rank of one `ThreadComm` world. Keeping the mailbox
/// per-world (instead of process-global) isolates concurrently running
/// worlds, so two tests can use the same tags without crosstalk.
struct World {
    size: usize,
    mail: Mutex<HashMap<MailKey, Arc<(Mutex<Slot>, Condvar)>>>,
    barrier: Mutex<BarrierState>,
    barrier_cv: Condvar,
}

impl World {
    fn entry(&self, key: MailKey) -> Arc<(Mutex<Slot>, Condvar)> {
        let mut g = self.mail.lock().expect("mailbox poisoned");
        g.entry(key)
            .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
            .clone()
    }
}

/// Intra-process communicator: every rank is a thread, messages are queued
/// in a per-world mailbox keyed by `(src, dst, tag)`.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    world: Arc<World>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.world.size)
            .finish()
    }
}

impl ThreadComm {
    /// Create all ranks of an isolated world. Element `r` of the returned
    /// vector is the communicator for rank `r`; hand each to its own thread.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let world = Arc::new(World {
            size: size.max(1),
            mail: Mutex::new(HashMap::new()),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                epoch: 0,
            }),
            barrier_cv: Condvar::new(),
        });
        (0..size.max(1))
            .map(|rank| ThreadComm {
                rank,
                world: world.clone(),
            })
            .collect()
    }
}

pub struct ThreadSendHandle;

impl Wait for ThreadSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

pub struct ThreadRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for ThreadRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("mailbox slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("mailbox condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("queue non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSendHandle;
    type RecvHandle = ThreadRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let entry = self.world.entry((self.rank, peer, tag));
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("mailbox slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        ThreadSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        ThreadRecvHandle {
            cell: self.world.entry((peer, self.rank, tag)),
            want_len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn barrier(&self) {
        let mut b = self.world.barrier.lock().expect("barrier poisoned");
        let epoch = b.epoch;
        b.arrived += 1;
        if b.arrived == self.world.size {
            b.arrived = 0;
            b.epoch += 1;
            self.world.barrier_cv.notify_all();
        } else {
            while b.epoch == epoch {
                b = self
                    .world
                    .barrier_cv
                    .wait(b)
                    .expect("barrier condvar poisoned");
            }
        }
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// Inter-process communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let universe = mpi::initialize().expect("MPI initialization failed");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: universe,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            use mpi::request::StaticScope;
            // The request borrows the buffer for 'static, so it is boxed and
            // reclaimed after the wait.
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, template: &mut [u8]) -> Self::RecvHandle {
            use mpi::request::StaticScope;
            let len = template.len();
            let raw: *mut [u8] = Box::into_raw(vec![0u8; len].into_boxed_slice());
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                let _ = req.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe { drop(Box::from_raw(ptr.as_ptr())) };
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                let _ = req.test();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe { drop(Box::from_raw(ptr.as_ptr())) };
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                let _ = req.wait();
            }
            let ptr = self.buf.take().expect("receive buffer missing");
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                let _ = req.test();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe { drop(Box::from_raw(ptr.as_ptr())) };
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_comm_round_trip() {
        let mut ranks = ThreadComm::world(2);
        let c1 = ranks.pop().unwrap();
        let c0 = ranks.pop().unwrap();

        let msg = b"hello";
        let _s = c0.isend(1, 7, msg);

        let mut buf = [0u8; 5];
        let h = c1.irecv(0, 7, &mut buf);
        assert_eq!(h.wait().unwrap(), msg);
    }

    #[test]
    fn thread_comm_fifo_order() {
        let mut ranks = ThreadComm::world(2);
        let c1 = ranks.pop().unwrap();
        let c0 = ranks.pop().unwrap();

        for i in 0..10u8 {
            let _ = c0.isend(1, 3, &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            let h = c1.irecv(0, 3, &mut b);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn thread_comm_truncates_to_posted_length() {
        let mut ranks = ThreadComm::world(2);
        let c1 = ranks.pop().unwrap();
        let c0 = ranks.pop().unwrap();

        let _ = c0.isend(1, 9, &[1, 2, 3, 4, 5, 6]);
        let mut b = [0u8; 4];
        let h = c1.irecv(0, 9, &mut b);
        assert_eq!(h.wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn worlds_are_isolated() {
        let mut a = ThreadComm::world(2);
        let mut b = ThreadComm::world(2);
        let a1 = a.pop().unwrap();
        let a0 = a.pop().unwrap();
        let b1 = b.pop().unwrap();
        let _b0 = b.pop().unwrap();

        // Same (peer, tag) in a different world must not be visible here.
        let _ = a0.isend(1, 42, &[0xAA]);
        let mut buf = [0u8; 1];
        let ha = a1.irecv(0, 42, &mut buf);
        assert_eq!(ha.wait().unwrap(), vec![0xAA]);

        let _ = b1; // world b never saw the message
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let ranks = ThreadComm::world(3);
        let mut handles = Vec::new();
        for comm in ranks {
            handles.push(std::thread::spawn(move || {
                for _ in 0..4 {
                    comm.barrier();
                }
                comm.rank()
            }));
        }
        let mut done: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        done.sort_unstable();
        assert_eq!(done, vec![0, 1, 2]);
    }
}
