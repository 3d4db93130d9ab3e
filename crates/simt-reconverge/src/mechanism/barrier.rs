//! Reconvergence only at barriers
//!
//! Divergent branches split the current context and the halves never merge
//! on their own. Lanes meet again only when every launch lane parks at a
//! CTA barrier, or not at all.

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
pub struct BarrierMechanism {
    core: MechanismCore,
}

impl BarrierMechanism {
    pub fn new(kernel: Arc<Kernel>, cta_size: usize) -> Self {
        Self {
            core: MechanismCore::new(kernel, cta_size),
        }
    }
}

impl ReconvergenceMechanism for BarrierMechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::Barrier
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

        let stack = &mut self.core.stack;
        stack
            .pop()
            .ok_or_else(|| ReconvergenceError::structural("no current context"))?;
        let fall = stack.spawn(fallthrough.clone(), pc + 1, None);
        let take = stack.spawn(taken.clone(), target, None);
        stack.push(fall)?;
        stack.push(take)?;

        debug!(pc, taken = %taken, fallthrough = %fallthrough, "branch diverged");
        record_divergence(MechanismType::Barrier.as_str(), pc, taken.count(), fallthrough.count());
        self.core.verify_stack()?;
        Ok(true)
    }

    fn eval_bar(&mut self, instr: &Instruction) -> Result<()> {
        self.core.park_current(instr)?;
        self.core.verify_stack()
    }

    fn eval_reconverge(&mut self, instr: &Instruction) -> Result<()> {
        if !self.core.ready()? {
            return Ok(());
        }
        let current = self.core.current_mut()?;
        if !matches!(instr, Instruction::RECONVERGE) {
            return Err(ReconvergenceError::malformed(
                current.pc,
                format!("eval_reconverge given '{instr}'"),
            ));
        }
        current.pc += 1;
        Ok(())
    }

    fn eval_exit(&mut self, instr: &Instruction) -> Result<()> {
        self.core.exit_current(instr)?;
        self.core.verify_stack()
    }

    fn next_instruction(&mut self, instr: &Instruction) -> Result<bool> {
        self.core.ensure_initialized()?;
        if !instr.is_control() {
            if let Some(top) = self.core.stack.top_mut() {
                top.pc += 1;
            }
        }
        self.core.verify_stack()?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Guard, Predicate};

    fn mask(lanes: &[usize]) -> LaneMask {
        LaneMask::from_lanes(4, lanes.iter().copied())
    }

    /// 0: @p0 bra 3 (ipdom 3)
    /// 1: nop
    /// 2: nop
    /// 3: bar.sync 0
    /// 4: exit
    fn split_then_barrier() -> BarrierMechanism {
        let instructions = vec![
            Instruction::branch(3, Guard::when(Predicate::new(0)), 3),
            Instruction::NOP,
            Instruction::NOP,
            Instruction::BAR { id: 0 },
            Instruction::exit(),
        ];
        let mut mechanism = BarrierMechanism::new(Arc::new(Kernel::new("bar", instructions)), 4);
        mechanism.initialize().unwrap();
        mechanism
    }

    #[test]
    fn divergence_ignores_post_dominator() {
        let mut mechanism = split_then_barrier();
        let bra = mechanism.core.kernel.instructions[0].clone();
        assert!(mechanism.eval_bra(&bra, &mask(&[0, 1]), &mask(&[2, 3])).unwrap());
        mechanism.next_instruction(&bra).unwrap();

        assert_eq!(mechanism.stack_size(), 2);
        for ctx in mechanism.core.stack.iter() {
            assert_eq!(ctx.reconverge_pc, None);
        }
        assert_eq!(mechanism.context().unwrap().pc, 3);
    }

    #[test]
    fn halves_meet_only_at_the_barrier() {
        let mut mechanism = split_then_barrier();
        let bar = Instruction::BAR { id: 0 };
        let bra = mechanism.core.kernel.instructions[0].clone();
        mechanism.eval_bra(&bra, &mask(&[0, 1]), &mask(&[2, 3])).unwrap();
        mechanism.next_instruction(&bra).unwrap();

        // taken half parks; fall-through half runs 1, 2 then arrives
        mechanism.eval_bar(&bar).unwrap();
        mechanism.next_instruction(&bar).unwrap();
        assert_eq!(mechanism.stack_size(), 1);
        assert_eq!(mechanism.context().unwrap().active_mask, mask(&[2, 3]));
        mechanism.next_instruction(&Instruction::NOP).unwrap();
        mechanism.next_instruction(&Instruction::NOP).unwrap();
        assert_eq!(mechanism.context().unwrap().pc, 3);

        mechanism.eval_bar(&bar).unwrap();
        assert!(mechanism.next_instruction(&bar).unwrap());
        let released = mechanism.context().unwrap();
        assert_eq!(released.active_mask, LaneMask::full(4));
        assert_eq!(released.pc, 4);
        assert_eq!(mechanism.stack_size(), 1);
    }

    #[test]
    fn barrier_after_early_exit_is_unreachable() {
        let instructions = vec![
            Instruction::EXIT {
                guard: Some(Guard::when(Predicate::new(0))),
            },
            Instruction::BAR { id: 0 },
            Instruction::exit(),
        ];
        let mut mechanism = BarrierMechanism::new(Arc::new(Kernel::new("early", instructions.clone())), 4);
        mechanism.initialize().unwrap();
        mechanism.core.current_mut().unwrap().predicate_mask = mask(&[3]);
        mechanism.eval_exit(&instructions[0]).unwrap();
        mechanism.next_instruction(&instructions[0]).unwrap();
        assert_eq!(mechanism.context().unwrap().pc, 1);

        assert_eq!(
            mechanism.eval_bar(&instructions[1]),
            Err(ReconvergenceError::UnreachableBarrier {
                barrier_pc: 1,
                missing: mask(&[3]),
            })
        );
    }

    #[test]
    fn marker_is_skipped() {
        let kernel = Kernel::new("marker", vec![Instruction::RECONVERGE, Instruction::exit()]);
        let mut mechanism = BarrierMechanism::new(Arc::new(kernel), 2);
        mechanism.initialize().unwrap();
        mechanism.eval_reconverge(&Instruction::RECONVERGE).unwrap();
        mechanism.next_instruction(&Instruction::RECONVERGE).unwrap();
        assert_eq!(mechanism.context().unwrap().pc, 1);
        assert_eq!(mechanism.stack_size(), 1);
    }
}
