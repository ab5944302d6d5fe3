//! Block-based parallel vector.
//!
//! A [`BlockVec`] stores one fixed-size block of scalars per node in three
//! regions: `local` (authoritative values for owned nodes), `ghost` (shadow
//! slots for non-owned nodes of interest), and `dep` (scratch for dependent
//! nodes). The algebraic primitives act on `local` only; the two-phase
//! assembly and distribution protocols reconcile the regions across ranks.
//!
//! At rest, i.e. outside a `begin_*`/`end_*` window, the ghost region is
//! zero. Collective routines (`norm`, `dot`, `mdot`, `set_rand`, file I/O,
//! the `begin_*`/`end_*` pairs) must be called on every rank in the same
//! order; everything else is rank-local.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::bc::BcMap;
use crate::comm::collective::{allreduce_sum, broadcast_bytes};
use crate::comm::communicator::{CommTag, Communicator};
use crate::dist::{DistContext, DistPlan};
use crate::error::BlockVecError;
use crate::index::{DepNodeTable, OwnerMap};
use crate::vec::AssemblyOp;
use crate::Scalar;

const TAG_REDUCE: CommTag = CommTag::new(0x6B00);
const TAG_RAND: CommTag = CommTag::new(0x6B10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExchangePhase {
    Idle,
    Assembling,
    Distributing,
}

impl ExchangePhase {
    fn name(self) -> &'static str {
        match self {
            ExchangePhase::Idle => "idle",
            ExchangePhase::Assembling => "assembling",
            ExchangePhase::Distributing => "distributing",
        }
    }
}

/// Distributed block vector.
pub struct BlockVec<C: Communicator> {
    map: Arc<OwnerMap<C>>,
    bsize: usize,
    local: Vec<Scalar>,
    ghost: Vec<Scalar>,
    dep: Vec<Scalar>,
    plan: Option<Arc<DistPlan<C>>>,
    deps: Option<Arc<DepNodeTable>>,
    bcs: Option<Arc<BcMap>>,
    ctx: Option<DistContext<C>>,
    phase: ExchangePhase,
}

impl<C: Communicator> BlockVec<C> {
    /// Create a vector with no ghost region, dependent nodes, or boundary
    /// conditions. The assembly protocol degenerates to local deposits.
    pub fn new(map: Arc<OwnerMap<C>>, bsize: usize) -> Result<Self, BlockVecError> {
        Self::with_parts(map, bsize, None, None, None)
    }

    /// Create a vector wired to its collaborators. Absent collaborators
    /// disable the corresponding protocol paths.
    pub fn with_parts(
        map: Arc<OwnerMap<C>>,
        bsize: usize,
        bcs: Option<Arc<BcMap>>,
        plan: Option<Arc<DistPlan<C>>>,
        deps: Option<Arc<DepNodeTable>>,
    ) -> Result<Self, BlockVecError> {
        if bsize == 0 {
            return Err(BlockVecError::InvalidBlockSize);
        }
        let rank = map.rank();
        let local = vec![0.0; bsize * map.owned_count(rank)];
        let (ghost, ctx) = match &plan {
            Some(p) => (vec![0.0; bsize * p.size()], Some(p.create_context(bsize))),
            None => (Vec::new(), None),
        };
        let dep = match &deps {
            Some(t) => vec![0.0; bsize * t.len()],
            None => Vec::new(),
        };
        if let Some(t) = &deps {
            // Every dependent parent must be readable on this rank.
            let own = map.owned_range(rank);
            for &parent in t.conn() {
                let ghosted = plan
                    .as_ref()
                    .map_or(false, |p| p.indices().contains(parent));
                if !own.contains(&parent) && !ghosted {
                    return Err(BlockVecError::DanglingDepParent { parent, rank });
                }
            }
        }
        Ok(Self {
            map,
            bsize,
            local,
            ghost,
            dep,
            plan,
            deps,
            bcs,
            ctx,
            phase: ExchangePhase::Idle,
        })
    }

    /// Scalars per node.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.bsize
    }

    /// Length of the owned region in scalars.
    #[inline]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// The ownership partition this vector is built on.
    #[inline]
    pub fn owner_map(&self) -> &Arc<OwnerMap<C>> {
        &self.map
    }

    /// Owned values, in owned-node order.
    #[inline]
    pub fn local_values(&self) -> &[Scalar] {
        &self.local
    }

    /// Mutable owned values.
    #[inline]
    pub fn local_values_mut(&mut self) -> &mut [Scalar] {
        &mut self.local
    }

    /// Ghost values, in ghost-set order. Zero at rest.
    #[inline]
    pub fn ghost_values(&self) -> &[Scalar] {
        &self.ghost
    }

    /// Dependent-node values, in table order.
    #[inline]
    pub fn dep_values(&self) -> &[Scalar] {
        &self.dep
    }

    fn check_same_shape(&self, other: &Self) -> Result<(), BlockVecError> {
        if self.local.len() != other.local.len() {
            return Err(BlockVecError::LengthMismatch {
                expected: self.local.len(),
                found: other.local.len(),
            });
        }
        Ok(())
    }

    // --- algebra ------------------------------------------------------

    /// 2-norm over all owned entries of all ranks. Collective.
    pub fn norm(&self) -> Result<Scalar, BlockVecError> {
        let mut acc = [self.local.iter().map(|x| x * x).sum::<Scalar>()];
        allreduce_sum(self.map.comm().as_ref(), &mut acc, TAG_REDUCE)?;
        Ok(acc[0].sqrt())
    }

    /// Global dot product with `other`. Collective.
    pub fn dot(&self, other: &Self) -> Result<Scalar, BlockVecError> {
        self.check_same_shape(other)?;
        let mut acc = [self
            .local
            .iter()
            .zip(&other.local)
            .map(|(x, y)| x * y)
            .sum::<Scalar>()];
        allreduce_sum(self.map.comm().as_ref(), &mut acc, TAG_REDUCE)?;
        Ok(acc[0])
    }

    /// Multiple dot products with a single reduction. Collective.
    pub fn mdot(&self, others: &[&Self], out: &mut [Scalar]) -> Result<(), BlockVecError> {
        if out.len() != others.len() {
            return Err(BlockVecError::LengthMismatch {
                expected: others.len(),
                found: out.len(),
            });
        }
        for other in others {
            self.check_same_shape(other)?;
        }
        for (slot, other) in out.iter_mut().zip(others) {
            *slot = self
                .local
                .iter()
                .zip(&other.local)
                .map(|(x, y)| x * y)
                .sum();
        }
        allreduce_sum(self.map.comm().as_ref(), out, TAG_REDUCE)
    }

    /// `local <- alpha * local`.
    pub fn scale(&mut self, alpha: Scalar) {
        for x in &mut self.local {
            *x *= alpha;
        }
    }

    /// `local <- alpha * other.local + local`.
    pub fn axpy(&mut self, alpha: Scalar, other: &Self) -> Result<(), BlockVecError> {
        self.check_same_shape(other)?;
        for (x, y) in self.local.iter_mut().zip(&other.local) {
            *x += alpha * y;
        }
        Ok(())
    }

    /// `local <- alpha * other.local + beta * local`.
    pub fn axpby(&mut self, alpha: Scalar, beta: Scalar, other: &Self) -> Result<(), BlockVecError> {
        self.check_same_shape(other)?;
        for (x, y) in self.local.iter_mut().zip(&other.local) {
            *x = alpha * y + beta * *x;
        }
        Ok(())
    }

    /// `local <- other.local`; ghost and dependent regions are untouched.
    pub fn copy_values(&mut self, other: &Self) -> Result<(), BlockVecError> {
        self.check_same_shape(other)?;
        self.local.copy_from_slice(&other.local);
        Ok(())
    }

    /// Zero the owned, ghost, and dependent regions.
    pub fn zero_entries(&mut self) {
        self.local.fill(0.0);
        self.ghost.fill(0.0);
        self.dep.fill(0.0);
    }

    /// Assign a constant to the owned region only.
    pub fn set(&mut self, value: Scalar) {
        self.local.fill(value);
    }

    /// Fill the owned region with uniform draws from `[lower, upper]`.
    /// Collective: rank 0 draws a fresh seed and broadcasts it, then every
    /// rank runs the deterministic fill.
    pub fn set_rand(&mut self, lower: Scalar, upper: Scalar) -> Result<(), BlockVecError> {
        let mut seed_bytes = [0u8; 8];
        if self.map.rank() == 0 {
            seed_bytes = SmallRng::from_entropy().next_u64().to_le_bytes();
        }
        broadcast_bytes(self.map.comm().as_ref(), 0, &mut seed_bytes, TAG_RAND)?;
        self.set_rand_seeded(u64::from_le_bytes(seed_bytes), lower, upper);
        Ok(())
    }

    /// Deterministic uniform fill: the union of all ranks' owned regions
    /// equals, in global order, the sequence a single-rank run with the same
    /// seed produces. Each rank advances the generator through foreign
    /// spans, consuming and discarding those draws.
    pub fn set_rand_seeded(&mut self, seed: u64, lower: Scalar, upper: Scalar) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let rank = self.map.rank();
        for r in 0..self.map.size() {
            if r != rank {
                for _ in 0..self.bsize * self.map.owned_count(r) {
                    let _: Scalar = rng.r#gen();
                }
            } else {
                for x in &mut self.local {
                    *x = lower + (upper - lower) * rng.r#gen::<Scalar>();
                }
            }
        }
    }

    // --- scatter / gather ---------------------------------------------

    fn ghost_slot(&self, g: i64) -> Result<usize, BlockVecError> {
        self.plan
            .as_ref()
            .and_then(|p| p.indices().find_index(g))
            .ok_or(BlockVecError::GhostIndexNotFound(g))
    }

    fn deposit(dst: &mut [Scalar], src: &[Scalar], op: AssemblyOp) {
        match op {
            AssemblyOp::Insert => dst.copy_from_slice(src),
            AssemblyOp::Add => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += *s;
                }
            }
        }
    }

    /// Deposit `indices.len()` blocks keyed by global node indices. Owned
    /// indices target the owned region, negative indices the dependent
    /// region (`-i - 1` addresses dependent `i`), everything else the ghost
    /// region. Rank-local.
    pub fn set_values(
        &mut self,
        indices: &[i64],
        vals: &[Scalar],
        op: AssemblyOp,
    ) -> Result<(), BlockVecError> {
        let b = self.bsize;
        if vals.len() != indices.len() * b {
            return Err(BlockVecError::LengthMismatch {
                expected: indices.len() * b,
                found: vals.len(),
            });
        }
        let own = self.map.owned_range(self.map.rank());
        let nglobal = self.map.global_len();
        for (i, &g) in indices.iter().enumerate() {
            let src = &vals[i * b..(i + 1) * b];
            if own.contains(&g) {
                let off = b * (g - own.start) as usize;
                Self::deposit(&mut self.local[off..off + b], src, op);
            } else if g < 0 {
                let d = (-g - 1) as usize;
                let ndep = self.deps.as_ref().map_or(0, |t| t.len());
                if d >= ndep {
                    return Err(BlockVecError::DepIndexOutOfRange(g, ndep));
                }
                Self::deposit(&mut self.dep[b * d..b * (d + 1)], src, op);
            } else if g >= nglobal {
                return Err(BlockVecError::IndexOutOfRange(g));
            } else {
                let j = self.ghost_slot(g)?;
                Self::deposit(&mut self.ghost[b * j..b * (j + 1)], src, op);
            }
        }
        Ok(())
    }

    /// Read `indices.len()` blocks into `out`, from the same regions
    /// `set_values` writes. Ghost reads are only meaningful after a
    /// distribution. Rank-local.
    pub fn get_values(&self, indices: &[i64], out: &mut [Scalar]) -> Result<(), BlockVecError> {
        let b = self.bsize;
        if out.len() != indices.len() * b {
            return Err(BlockVecError::LengthMismatch {
                expected: indices.len() * b,
                found: out.len(),
            });
        }
        let own = self.map.owned_range(self.map.rank());
        let nglobal = self.map.global_len();
        for (i, &g) in indices.iter().enumerate() {
            let dst = &mut out[i * b..(i + 1) * b];
            if own.contains(&g) {
                let off = b * (g - own.start) as usize;
                dst.copy_from_slice(&self.local[off..off + b]);
            } else if g < 0 {
                let d = (-g - 1) as usize;
                let ndep = self.deps.as_ref().map_or(0, |t| t.len());
                if d >= ndep {
                    return Err(BlockVecError::DepIndexOutOfRange(g, ndep));
                }
                dst.copy_from_slice(&self.dep[b * d..b * (d + 1)]);
            } else if g >= nglobal {
                return Err(BlockVecError::IndexOutOfRange(g));
            } else {
                let j = self.ghost_slot(g)?;
                dst.copy_from_slice(&self.ghost[b * j..b * (j + 1)]);
            }
        }
        Ok(())
    }

    // --- assembly protocol --------------------------------------------

    fn enter_phase(&mut self, next: ExchangePhase) -> Result<(), BlockVecError> {
        if self.phase != ExchangePhase::Idle {
            return Err(BlockVecError::PhaseMismatch {
                expected: ExchangePhase::Idle.name(),
                found: self.phase.name(),
            });
        }
        self.phase = next;
        Ok(())
    }

    fn expect_phase(&self, want: ExchangePhase) -> Result<(), BlockVecError> {
        if self.phase != want {
            return Err(BlockVecError::PhaseMismatch {
                expected: want.name(),
                found: self.phase.name(),
            });
        }
        Ok(())
    }

    /// Start collecting deposited values at their owners. Under `Add`,
    /// dependent contributions are first folded into their parents' owned or
    /// ghost slots; under `Insert` dependents are ignored (they have no
    /// independent identity). Then the reverse exchange is initiated.
    /// Collective.
    pub fn begin_set_values(&mut self, op: AssemblyOp) -> Result<(), BlockVecError> {
        self.enter_phase(ExchangePhase::Assembling)?;
        if op == AssemblyOp::Add {
            if let Some(deps) = self.deps.clone() {
                let b = self.bsize;
                let rank = self.map.rank();
                let own = self.map.owned_range(rank);
                let ghosts = self.plan.as_ref().map(|p| p.indices().clone());
                let (ptr, conn, wts) = (deps.ptr(), deps.conn(), deps.weights());
                for i in 0..deps.len() {
                    for jp in ptr[i]..ptr[i + 1] {
                        let parent = conn[jp];
                        let w = wts[jp];
                        if own.contains(&parent) {
                            let off = b * (parent - own.start) as usize;
                            for k in 0..b {
                                self.local[off + k] += w * self.dep[b * i + k];
                            }
                        } else {
                            let j = ghosts
                                .as_ref()
                                .and_then(|g| g.find_index(parent))
                                .ok_or(BlockVecError::DanglingDepParent { parent, rank })?;
                            for k in 0..b {
                                self.ghost[b * j + k] += w * self.dep[b * i + k];
                            }
                        }
                    }
                }
            }
        }
        if let (Some(plan), Some(ctx)) = (&self.plan, &mut self.ctx) {
            plan.begin_reverse(ctx, &self.ghost, op)?;
        }
        Ok(())
    }

    /// Finish the reverse exchange and restore the ghost-zero rest state.
    /// Collective.
    pub fn end_set_values(&mut self, op: AssemblyOp) -> Result<(), BlockVecError> {
        self.expect_phase(ExchangePhase::Assembling)?;
        if let (Some(plan), Some(ctx)) = (&self.plan, &mut self.ctx) {
            plan.end_reverse(ctx, &mut self.local, op)?;
        }
        self.ghost.fill(0.0);
        self.phase = ExchangePhase::Idle;
        Ok(())
    }

    /// Initiate the owners-to-ghosts broadcast. Collective.
    pub fn begin_distribute_values(&mut self) -> Result<(), BlockVecError> {
        self.enter_phase(ExchangePhase::Distributing)?;
        if let (Some(plan), Some(ctx)) = (&self.plan, &mut self.ctx) {
            plan.begin_forward(ctx, &self.local)?;
        }
        Ok(())
    }

    /// Finish the forward exchange, then evaluate every dependent node from
    /// its parents' freshly distributed values. Collective.
    pub fn end_distribute_values(&mut self) -> Result<(), BlockVecError> {
        self.expect_phase(ExchangePhase::Distributing)?;
        if let (Some(plan), Some(ctx)) = (&self.plan, &mut self.ctx) {
            plan.end_forward(ctx, &mut self.ghost)?;
        }
        if let Some(deps) = self.deps.clone() {
            let b = self.bsize;
            let rank = self.map.rank();
            let own = self.map.owned_range(rank);
            let ghosts = self.plan.as_ref().map(|p| p.indices().clone());
            let (ptr, conn, wts) = (deps.ptr(), deps.conn(), deps.weights());
            for i in 0..deps.len() {
                self.dep[b * i..b * (i + 1)].fill(0.0);
                for jp in ptr[i]..ptr[i + 1] {
                    let parent = conn[jp];
                    let w = wts[jp];
                    if own.contains(&parent) {
                        let off = b * (parent - own.start) as usize;
                        for k in 0..b {
                            self.dep[b * i + k] += w * self.local[off + k];
                        }
                    } else {
                        let j = ghosts
                            .as_ref()
                            .and_then(|g| g.find_index(parent))
                            .ok_or(BlockVecError::DanglingDepParent { parent, rank })?;
                        for k in 0..b {
                            self.dep[b * i + k] += w * self.ghost[b * j + k];
                        }
                    }
                }
            }
        }
        self.phase = ExchangePhase::Idle;
        Ok(())
    }

    // --- boundary conditions ------------------------------------------

    /// Zero every owned constrained DOF. The stored Dirichlet values are
    /// deliberately not written here; they belong to the residual and matrix
    /// paths. Rank-local.
    pub fn apply_bcs(&mut self) -> Result<(), BlockVecError> {
        let Some(bcs) = self.bcs.clone() else {
            return Ok(());
        };
        let b = self.bsize;
        let own = self.map.owned_range(self.map.rank());
        for rec in bcs.iter() {
            if own.contains(&rec.global) {
                let base = b * (rec.global - own.start) as usize;
                for &dof in rec.dofs {
                    if dof >= b {
                        return Err(BlockVecError::BcDofOutOfRange { dof, bsize: b });
                    }
                    self.local[base + dof] = 0.0;
                }
            }
        }
        Ok(())
    }
}
