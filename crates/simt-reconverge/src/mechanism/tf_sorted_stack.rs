//! Thread frontiers kept as a sorted context stack
//!
//! Contexts are ordered by program counter with the lowest pc on top, so
//! the lanes furthest behind always run first. Whenever two contexts reach
//! the same pc they merge, without waiting for a post-dominator.

use super::common::MechanismCore;
use super::{MechanismState, MechanismType, ReconvergenceMechanism};
use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, Kernel};
use crate::lanes::PredicateFile;
use crate::mask::LaneMask;
use simt_tracing::performance::record_divergence;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct TfSortedStackMechanism {
    core: MechanismCore,
}

impl TfSortedStackMechanism {
    pub fn new(kernel: Arc<Kernel>, cta_size: usize) -> Self {
        Self {
            core: MechanismCore::new(kernel, cta_size),
        }
    }

    /// Restore pc order (lowest on top) and merge contexts sharing a pc.
    ///
    /// The survivor of a merge is the earlier-created context.
    fn normalize(&mut self) -> Result<()> {
        let mut contexts = self.core.stack.take_all();
        // bottom first: highest pc at the bottom, older context above a younger one at equal pc
        contexts.sort_by(|a, b| b.pc.cmp(&a.pc).then(b.sequence.cmp(&a.sequence)));

        let mut sorted: Vec<ExecutionContext> = Vec::with_capacity(contexts.len());
        for mut ctx in contexts {
            if let Some(prev) = sorted.last() {
                if prev.pc == ctx.pc {
                    if let Some(prev) = sorted.pop() {
                        ctx.active_mask.union_with(&prev.active_mask);
                        ctx.predicate_mask = LaneMask::empty(ctx.active_mask.width());
                        debug!(pc = ctx.pc, lanes = %ctx.active_mask, "frontier contexts merged");
                    }
                }
            }
            sorted.push(ctx);
        }
        for ctx in sorted {
            self.core.stack.push(ctx)?;
        }
        Ok(())
    }

    fn finish_step(&mut self) -> Result<()> {
        self.normalize()?;
        self.core.verify_stack()
    }
}

impl ReconvergenceMechanism for TfSortedStackMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::TfSortedStack
    }

    fn state(&self) -> MechanismState {
        self.core.state
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.reset_root()
    }

    fn eval_predicate(&mut self, predicates: &dyn PredicateFile) -> Result<()> {
        self.core.eval_predicate(predicates)
    }

    fn eval_bra(&mut self, instr: &Instruction, taken: &LaneMask, fallthrough: &LaneMask) -> Result<bool> {
        if !self.core.ready()? {
            return Ok(false);
        }
        let (target, taken, fallthrough) = self.core.branch_masks(instr, taken, fallthrough)?;
        let pc = self.core.current()?.pc;

        if fallthrough.is_empty() || taken.is_empty() {
            let next = if fallthrough.is_empty() { target } else { pc + 1 };
            self.core.current_mut()?.pc = next;
            self.finish_step()?;
            return Ok(false);
        }

        let stack = &mut self.core.stack;
        stack
            .pop()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))?;
        let fall = stack.spawn(fallthrough.clone(), pc + 1, None);
        let take = stack.spawn(taken.clone(), target, None);
        stack.push(fall)?;
        stack.push(take)?;

        debug!(pc, taken = %taken, fallthrough = %fallthrough, "branch diverged");
        record_divergence(MechanismType::TfSortedStack.as_str(), pc, taken.count(), fallthrough.count());
        self.finish_step()?;
        Ok(true)
    }

    fn eval_bar(&mut self, instr: &Instruction) -> Result<()> {
        self.core.park_current(instr)?;
        self.finish_step()
    }

    fn eval_reconverge(&mut self, instr: &Instruction) -> Result<()> {
        if !self.core.ready()? {
            return Ok(());
        }
        let pc = self.core.current()?.pc;
        if !matches!(instr, Instruction::RECONVERGE) {
            return Err(ReconvergenceError::malformed(pc, format!("eval_reconverge given '{instr}'")));
        }
        self.normalize()?;
        if let Some(top) = self.core.stack.top_mut() {
            if top.pc == pc {
                top.pc += 1;
            }
        }
        self.finish_step()
    }

    fn eval_exit(&mut self, instr: &Instruction) -> Result<()> {
        self.core.exit_current(instr)?;
        self.finish_step()
    }

    fn next_instruction(&mut self, instr: &Instruction) -> Result<bool> {
        self.core.ensure_initialized()?;
        if !instr.is_control() {
            if let Some(top) = self.core.stack.top_mut() {
                top.pc += 1;
            }
        }
        self.finish_step()?;
        Ok(self.core.liveness())
    }

    fn context(&self) -> Option<&ExecutionContext> {
        self.core.stack.top()
    }

    fn stack_size(&self) -> usize {
        self.core.stack.len()
    }

    fn max_stack_depth(&self) -> usize {
        self.core.stack.max_depth()
    }

    fn live_lanes(&self) -> LaneMask {
        self.core.live()
    }

    fn kernel(&self) -> &Arc<Kernel> {
        &self.core.kernel
    }
}
