//! Immediate post-dominator reconvergence
//!
//! A divergent branch replaces the current context with two: the
//! fall-through lanes first, then the taken lanes on top, both tagged with
//! the branch's post-dominator. A context that reaches its post-dominator
//! waits beneath its sibling; when the sibling arrives too, the two merge
//! and the merged context takes over the enclosing post-dominator.

use super::common::MechanismCore;
use super::{MechanismState, MechanismType, ReconvergenceMechanism};
use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, Kernel};
use crate::lanes::PredicateFile;
use crate::mask::LaneMask;
use simt_tracing::performance::record_divergence;
use std::sync::Arc;
use tracing::{debug, trace};

/// Stack-based reconvergence at immediate post-dominators
#[derive(Debug)]
pub struct IpdomMechanism {
    core: MechanismCore,
}

impl IpdomMechanism {
    pub fn new(kernel: Arc<Kernel>, cta_size: usize) -> Self {
        Self {
            core: MechanismCore::new(kernel, cta_size),
        }
    }

    /// Merge or reorder contexts standing on their reconvergence point
    /// until the top context has somewhere else to go.
    fn settle(&mut self) -> Result<()> {
        let stack = &mut self.core.stack;
        while let Some(top) = stack.top() {
            if !top.at_reconvergence_point() {
                break;
            }
            let rpc = top.reconverge_pc;
            let pc = top.pc;
            let below = stack.below_top().map(|b| (b.reconverge_pc, b.pc));

            match below {
                Some((below_rpc, below_pc)) if below_rpc == rpc && below_pc == pc => {
                    let arrived = stack
                        .pop()
                        .ok_or_else(|| ReconvergenceError::structural("reconvergence on an empty stack"))?;
                    let outer = stack.below_top().and_then(|ctx| ctx.reconverge_pc);
                    let merged = stack
                        .top_mut()
                        .ok_or_else(|| ReconvergenceError::structural("reconvergence lost its sibling"))?;
                    merged.active_mask.union_with(&arrived.active_mask);
                    merged.sequence = merged.sequence.min(arrived.sequence);
                    merged.reconverge_pc = outer;
                    merged.predicate_mask = LaneMask::empty(merged.active_mask.width());
                    debug!(pc, lanes = %merged.active_mask, next_rpc = ?outer, "contexts reconverged");
                }
                Some((below_rpc, _)) if below_rpc == rpc => {
                    // sibling still on its way: wait beneath it
                    let waiting = stack
                        .pop()
                        .ok_or_else(|| ReconvergenceError::structural("reconvergence on an empty stack"))?;
                    trace!(pc, lanes = %waiting.active_mask, "context waiting at reconvergence point");
                    let at = stack.len() - 1;
                    stack.insert(at, waiting)?;
                }
                other => {
                    let outer = other.and_then(|(below_rpc, _)| below_rpc);
                    if let Some(top) = stack.top_mut() {
                        top.reconverge_pc = outer;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish_step(&mut self) -> Result<()> {
        self.settle()?;
        self.core.verify_stack()
    }
}

impl ReconvergenceMechanism for IpdomMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::Ipdom
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
            return Ok(false);
        }

        let Instruction::BRA {
            reconverge: Some(rpc), ..
        } = instr
        else {
            return Err(ReconvergenceError::malformed(
                pc,
                "divergent branch without a reconvergence point",
            ));
        };

        let stack = &mut self.core.stack;
        stack
            .pop()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))?;
        let fall = stack.spawn(fallthrough.clone(), pc + 1, Some(*rpc));
        let take = stack.spawn(taken.clone(), target, Some(*rpc));
        stack.push(fall)?;
        stack.push(take)?;

        debug!(pc, taken = %taken, fallthrough = %fallthrough, rpc, "branch diverged");
        record_divergence(MechanismType::Ipdom.as_str(), pc, taken.count(), fallthrough.count());
        self.core.verify_stack()?;
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
        self.settle()?;
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
