//! Per-vector scratch for one in-flight exchange.

use crate::comm::communicator::Communicator;
use crate::error::BlockVecError;
use crate::Scalar;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CtxPhase {
    Idle,
    Forward,
    Reverse,
}

impl CtxPhase {
    pub(crate) fn name(self) -> &'static str {
        match self {
            CtxPhase::Idle => "idle",
            CtxPhase::Forward => "forward",
            CtxPhase::Reverse => "reverse",
        }
    }
}

pub(crate) struct PendingRecv<C: Communicator> {
    pub(crate) peer: usize,
    /// Index into the plan's schedule for the active direction.
    pub(crate) slot: usize,
    pub(crate) buf: Vec<Scalar>,
    pub(crate) handle: C::RecvHandle,
}

/// Buffers and handles for the messages of one `begin_*`/`end_*` window.
///
/// A context belongs to exactly one vector: the exchange routines read and
/// write that vector's arrays, and the context keeps the in-flight state
/// between the begin and end halves.
pub struct DistContext<C: Communicator> {
    pub(crate) bsize: usize,
    pub(crate) phase: CtxPhase,
    pub(crate) pending_recvs: Vec<PendingRecv<C>>,
    pub(crate) pending_sends: Vec<C::SendHandle>,
}

impl<C: Communicator> DistContext<C> {
    pub(crate) fn new(bsize: usize) -> Self {
        Self {
            bsize,
            phase: CtxPhase::Idle,
            pending_recvs: Vec::new(),
            pending_sends: Vec::new(),
        }
    }

    /// Block size this context was created for.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.bsize
    }

    /// Enter `phase`; errors if an exchange is already in flight.
    pub(crate) fn enter(&mut self, phase: CtxPhase) -> Result<(), BlockVecError> {
        if self.phase != CtxPhase::Idle {
            return Err(BlockVecError::PhaseMismatch {
                expected: CtxPhase::Idle.name(),
                found: self.phase.name(),
            });
        }
        self.phase = phase;
        Ok(())
    }

    /// Check that `phase` is the one in flight before completing it.
    pub(crate) fn expect(&self, phase: CtxPhase) -> Result<(), BlockVecError> {
        if self.phase != phase {
            return Err(BlockVecError::PhaseMismatch {
                expected: phase.name(),
                found: self.phase.name(),
            });
        }
        Ok(())
    }
}
