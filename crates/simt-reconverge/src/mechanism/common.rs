//! State and steps shared by every reconvergence mechanism

use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, Kernel, Pc};
use crate::lanes::PredicateFile;
use crate::mask::LaneMask;
use crate::stack::ContextStack;
use std::sync::Arc;
use tracing::debug;

use super::MechanismState;

// ================================================================================================
// Barrier Arrivals
// ================================================================================================

/// Lanes parked at a CTA-wide barrier
#[derive(Debug, Clone)]
pub(crate) struct BarrierArrivals {
    pc: Option<Pc>,
    arrived: LaneMask,
}

impl BarrierArrivals {
    pub(crate) fn new(width: usize) -> Self {
        Self {
            pc: None,
            arrived: LaneMask::empty(width),
        }
    }

    pub(crate) fn arrived(&self) -> &LaneMask {
        &self.arrived
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.arrived.is_empty()
    }

    /// Park `lanes` at the barrier at `pc`.
    ///
    /// Lanes arriving at a different barrier than the parked ones deadlock:
    /// each barrier waits for the lanes held at the other.
    pub(crate) fn arrive(&mut self, pc: Pc, lanes: &LaneMask, launch: &LaneMask) -> Result<()> {
        match self.pc {
            Some(parked_pc) if parked_pc != pc => {
                return Err(ReconvergenceError::UnreachableBarrier {
                    barrier_pc: parked_pc,
                    missing: launch.difference(&self.arrived),
                })
            }
            _ => self.pc = Some(pc),
        }
        self.arrived.union_with(lanes);
        Ok(())
    }

    /// Whether every launch lane has arrived
    pub(crate) fn complete(&self, launch: &LaneMask) -> bool {
        &self.arrived == launch
    }

    /// The error for a barrier that no runnable lane can complete
    pub(crate) fn unreachable(&self, launch: &LaneMask) -> ReconvergenceError {
        ReconvergenceError::UnreachableBarrier {
            barrier_pc: self.pc.unwrap_or_default(),
            missing: launch.difference(&self.arrived),
        }
    }

    /// Release all parked lanes, returning them and the barrier pc
    pub(crate) fn release(&mut self) -> (LaneMask, Pc) {
        let width = self.arrived.width();
        let lanes = std::mem::replace(&mut self.arrived, LaneMask::empty(width));
        (lanes, self.pc.take().unwrap_or_default())
    }

    pub(crate) fn clear(&mut self) {
        self.pc = None;
        self.arrived = LaneMask::empty(self.arrived.width());
    }
}

// ================================================================================================
// Mechanism Core
// ================================================================================================

/// What every mechanism owns: the kernel, the context stack, and lane bookkeeping
#[derive(Debug)]
pub(crate) struct MechanismCore {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) stack: ContextStack,
    pub(crate) launch: LaneMask,
    pub(crate) exited: LaneMask,
    pub(crate) barrier: BarrierArrivals,
    pub(crate) state: MechanismState,
}

impl MechanismCore {
    pub(crate) fn new(kernel: Arc<Kernel>, cta_size: usize) -> Self {
        Self {
            kernel,
            stack: ContextStack::new(cta_size),
            launch: LaneMask::full(cta_size),
            exited: LaneMask::empty(cta_size),
            barrier: BarrierArrivals::new(cta_size),
            state: MechanismState::Uninitialized,
        }
    }

    pub(crate) fn cta_size(&self) -> usize {
        self.launch.width()
    }

    /// Reset to the single root context covering the whole CTA
    pub(crate) fn reset_root(&mut self) -> Result<()> {
        self.kernel.validate()?;
        self.stack.reset();
        self.exited = LaneMask::empty(self.cta_size());
        self.barrier.clear();
        let root = self.stack.spawn(self.launch.clone(), self.kernel.entry, None);
        self.stack.push(root)?;
        self.state = MechanismState::Running;
        Ok(())
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        match self.state {
            MechanismState::Uninitialized => Err(ReconvergenceError::NotInitialized),
            _ => Ok(()),
        }
    }

    /// Whether lanes remain to act on; operations on a finished mechanism are no-ops
    pub(crate) fn ready(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.state == MechanismState::Running)
    }

    /// Lanes that have not exited
    pub(crate) fn live(&self) -> LaneMask {
        self.launch.difference(&self.exited)
    }

    /// Lanes that may be scheduled: live and not parked at a barrier
    pub(crate) fn runnable(&self) -> LaneMask {
        self.live().difference(self.barrier.arrived())
    }

    pub(crate) fn current(&self) -> Result<&ExecutionContext> {
        self.stack
            .top()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))
    }

    pub(crate) fn current_mut(&mut self) -> Result<&mut ExecutionContext> {
        self.stack
            .top_mut()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))
    }

    /// Compute the predicate mask of the current context for the guard of
    /// the instruction at its pc
    pub(crate) fn eval_predicate(&mut self, predicates: &dyn PredicateFile) -> Result<()> {
        self.ensure_initialized()?;
        let Some(current) = self.stack.top() else {
            return Ok(());
        };
        let guard = self.kernel.instruction(current.pc)?.guard();
        let mask = match guard {
            None => current.active_mask.clone(),
            Some(guard) => {
                let mut mask = LaneMask::empty(self.cta_size());
                for lane in current.active_mask.lanes() {
                    if guard.holds(predicates.read_predicate(lane, guard.pred)?) {
                        mask.insert(lane);
                    }
                }
                mask
            }
        };
        self.current_mut()?.predicate_mask = mask;
        Ok(())
    }

    /// Validate the branch masks against the current context.
    ///
    /// Returns `(target, taken, fallthrough)` restricted to the active lanes.
    pub(crate) fn branch_masks(
        &self,
        instr: &Instruction,
        taken: &LaneMask,
        fallthrough: &LaneMask,
    ) -> Result<(Pc, LaneMask, LaneMask)> {
        let current = self.current()?;
        let pc = current.pc;
        let Instruction::BRA { target, .. } = instr else {
            return Err(ReconvergenceError::malformed(pc, format!("eval_bra given '{instr}'")));
        };
        for mask in [taken, fallthrough] {
            if mask.width() != self.cta_size() {
                return Err(ReconvergenceError::CtaSizeMismatch {
                    expected: self.cta_size(),
                    actual: mask.width(),
                });
            }
        }

        let taken = taken.intersection(&current.active_mask);
        let fallthrough = fallthrough.intersection(&current.active_mask);
        if taken.is_empty() && fallthrough.is_empty() {
            return Err(ReconvergenceError::malformed(pc, "branch with no active lanes on either path"));
        }
        if !taken.is_disjoint(&fallthrough) {
            return Err(ReconvergenceError::malformed(
                pc,
                format!("lanes {} both take and skip the branch", taken.intersection(&fallthrough)),
            ));
        }
        if taken.union(&fallthrough) != current.active_mask {
            return Err(ReconvergenceError::malformed(
                pc,
                format!(
                    "branch masks cover {} but {} are active",
                    taken.union(&fallthrough),
                    current.active_mask
                ),
            ));
        }
        Ok((*target, taken, fallthrough))
    }

    /// Retire the exiting lanes of the current context.
    ///
    /// A context left without lanes is popped; survivors move past the exit.
    pub(crate) fn exit_current(&mut self, instr: &Instruction) -> Result<LaneMask> {
        if !self.ready()? {
            return Ok(LaneMask::empty(self.cta_size()));
        }
        let current = self.current()?;
        let pc = current.pc;
        let exiting = match instr {
            Instruction::EXIT { guard: None } => current.active_mask.clone(),
            Instruction::EXIT { guard: Some(_) } => current.predicate_mask.intersection(&current.active_mask),
            other => return Err(ReconvergenceError::malformed(pc, format!("eval_exit given '{other}'"))),
        };

        self.exited.union_with(&exiting);
        let current = self.current_mut()?;
        current.active_mask.subtract(&exiting);
        current.predicate_mask = LaneMask::empty(current.active_mask.width());
        if current.active_mask.is_empty() {
            self.stack.pop();
        } else {
            current.pc += 1;
        }
        debug!(pc, lanes = %exiting, remaining = self.stack.len(), "lanes exited");

        if self.runnable().is_empty() {
            if self.barrier.is_pending() {
                return Err(self.barrier.unreachable(&self.launch));
            }
            self.state = MechanismState::Finished;
        }
        Ok(exiting)
    }

    /// Park the current context at the barrier it stands on.
    ///
    /// When nothing runnable remains the barrier either releases every lane
    /// as one context past the barrier, or is unreachable.
    pub(crate) fn park_current(&mut self, instr: &Instruction) -> Result<()> {
        if !self.ready()? {
            return Ok(());
        }
        let pc = self.current()?.pc;
        if !matches!(instr, Instruction::BAR { .. }) {
            return Err(ReconvergenceError::malformed(pc, format!("eval_bar given '{instr}'")));
        }
        let parked = self
            .stack
            .pop()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))?;
        self.barrier.arrive(pc, &parked.active_mask, &self.launch)?;
        debug!(pc, lanes = %parked.active_mask, arrived = %self.barrier.arrived(), "context parked at barrier");

        if !self.stack.is_empty() {
            return Ok(());
        }
        if !self.barrier.complete(&self.launch) {
            return Err(self.barrier.unreachable(&self.launch));
        }
        let (lanes, barrier_pc) = self.barrier.release();
        debug!(pc = barrier_pc, lanes = %lanes, "barrier released");
        let released = self.stack.spawn(lanes, barrier_pc + 1, None);
        self.stack.push(released)
    }

    /// Check that the stack partitions the runnable lanes
    pub(crate) fn verify_stack(&self) -> Result<()> {
        if !self.barrier.arrived().is_subset(&self.live()) {
            return Err(ReconvergenceError::structural(format!(
                "exited lanes {} are parked at a barrier",
                self.barrier.arrived().intersection(&self.exited)
            )));
        }
        self.stack.verify_partition(&self.runnable())
    }

    /// Report liveness and move to `Finished` once no lane remains
    pub(crate) fn liveness(&mut self) -> bool {
        if self.stack.is_empty() && !self.barrier.is_pending() {
            self.state = MechanismState::Finished;
            false
        } else {
            true
        }
    }
}
