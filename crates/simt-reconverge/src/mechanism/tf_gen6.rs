//! Thread frontiers over a per-lane PC table
//!
//! Every lane carries its own program counter. Before each instruction the
//! mechanism picks the largest group of runnable lanes sharing a pc (ties
//! go to the lowest pc) and presents it as the single current context.
//! Lanes that land on the same pc reconverge as soon as they are selected
//! together.

use super::common::MechanismCore;
use super::{MechanismState, MechanismType, ReconvergenceMechanism};
use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, Kernel, Pc};
use crate::lanes::PredicateFile;
use crate::mask::LaneMask;
use simt_tracing::performance::record_divergence;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct TfGen6Mechanism {
    core: MechanismCore,
    /// Program counter of each lane; `None` once the lane has exited
    thread_pcs: Vec<Option<Pc>>,
}

impl TfGen6Mechanism {
    pub fn new(kernel: Arc<Kernel>, cta_size: usize) -> Self {
        Self {
            core: MechanismCore::new(kernel, cta_size),
            thread_pcs: vec![None; cta_size],
        }
    }

    /// Per-lane program counters, indexed by lane
    pub fn thread_pcs(&self) -> &[Option<Pc>] {
        &self.thread_pcs
    }

    fn set_pc(&mut self, lanes: &LaneMask, pc: Pc) {
        for lane in lanes.lanes() {
            if let Some(slot) = self.thread_pcs.get_mut(lane) {
                *slot = Some(pc);
            }
        }
    }

    /// Runnable lanes grouped by program counter
    fn frontier(&self) -> BTreeMap<Pc, LaneMask> {
        let runnable = self.core.runnable();
        let mut groups: BTreeMap<Pc, LaneMask> = BTreeMap::new();
        for lane in runnable.lanes() {
            if let Some(Some(pc)) = self.thread_pcs.get(lane) {
                groups
                    .entry(*pc)
                    .or_insert_with(|| LaneMask::empty(runnable.width()))
                    .insert(lane);
            }
        }
        groups
    }

    /// Replace the current context with the largest group of lanes sharing a pc
    fn select(&mut self) -> Result<()> {
        let groups = self.frontier();
        self.core.stack.take_all();

        let mut best: Option<(Pc, LaneMask)> = None;
        for (pc, lanes) in groups {
            // ascending pc: only a strictly larger group displaces the current pick
            if best.as_ref().is_none_or(|(_, chosen)| lanes.count() > chosen.count()) {
                best = Some((pc, lanes));
            }
        }
        if let Some((pc, lanes)) = best {
            trace!(pc, lanes = %lanes, "frontier group selected");
            let ctx = self.core.stack.spawn(lanes, pc, None);
            self.core.stack.push(ctx)?;
        }
        Ok(())
    }

    /// Check that the pc table agrees with the exited lanes and the current context
    fn verify(&self) -> Result<()> {
        for (lane, pc) in self.thread_pcs.iter().enumerate() {
            if pc.is_some() != self.core.live().contains(lane) {
                return Err(ReconvergenceError::structural(format!(
                    "lane {lane} pc table entry disagrees with exit state"
                )));
            }
        }
        if let Some(ctx) = self.core.stack.top() {
            if self.core.stack.len() > 1 {
                return Err(ReconvergenceError::structural("thread frontier holds more than one context"));
            }
            if !ctx.active_mask.is_disjoint(self.core.barrier.arrived()) {
                return Err(ReconvergenceError::structural(format!(
                    "lanes {} scheduled while parked at a barrier",
                    ctx.active_mask.intersection(self.core.barrier.arrived())
                )));
            }
            if let Some(lane) = ctx.active_mask.lanes().find(|&lane| self.thread_pcs[lane] != Some(ctx.pc)) {
                return Err(ReconvergenceError::structural(format!(
                    "lane {lane} scheduled at pc {} but sits at {:?}",
                    ctx.pc, self.thread_pcs[lane]
                )));
            }
        }
        Ok(())
    }

    fn finish_step(&mut self) -> Result<()> {
        self.select()?;
        self.verify()
    }
}

impl ReconvergenceMechanism for TfGen6Mechanism {
    fn mechanism_type(&self) -> MechanismType {
        MechanismType::TfGen6
    }

    fn state(&self) -> MechanismState {
        self.core.state
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.reset_root()?;
        self.thread_pcs = vec![Some(self.core.kernel.entry); self.core.cta_size()];
        Ok(())
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
        self.set_pc(&taken, target);
        self.set_pc(&fallthrough, pc + 1);

        if fallthrough.is_empty() || taken.is_empty() {
            let next = if fallthrough.is_empty() { target } else { pc + 1 };
            self.core.current_mut()?.pc = next;
            self.verify()?;
            return Ok(false);
        }

        debug!(pc, taken = %taken, fallthrough = %fallthrough, "branch diverged");
        record_divergence(MechanismType::TfGen6.as_str(), pc, taken.count(), fallthrough.count());
        self.finish_step()?;
        Ok(true)
    }

    fn eval_bar(&mut self, instr: &Instruction) -> Result<()> {
        if !self.core.ready()? {
            return Ok(());
        }
        let current = self.core.current()?;
        let pc = current.pc;
        let arriving = current.active_mask.clone();
        if !matches!(instr, Instruction::BAR { .. }) {
            return Err(ReconvergenceError::malformed(pc, format!("eval_bar given '{instr}'")));
        }
        self.core.barrier.arrive(pc, &arriving, &self.core.launch)?;
        debug!(pc, lanes = %arriving, arrived = %self.core.barrier.arrived(), "lanes parked at barrier");

        if self.core.runnable().is_empty() {
            if !self.core.barrier.complete(&self.core.launch) {
                return Err(self.core.barrier.unreachable(&self.core.launch));
            }
            let (lanes, barrier_pc) = self.core.barrier.release();
            debug!(pc = barrier_pc, lanes = %lanes, "barrier released");
            self.set_pc(&lanes, barrier_pc + 1);
        }
        self.finish_step()
    }

    fn eval_reconverge(&mut self, instr: &Instruction) -> Result<()> {
        if !self.core.ready()? {
            return Ok(());
        }
        let current = self.core.current()?;
        let pc = current.pc;
        if !matches!(instr, Instruction::RECONVERGE) {
            return Err(ReconvergenceError::malformed(pc, format!("eval_reconverge given '{instr}'")));
        }
        // every runnable lane at the marker joins the current group
        let group = self.frontier().remove(&pc).unwrap_or_else(|| current.active_mask.clone());
        trace!(pc, lanes = %group, "lanes passing reconvergence marker");
        self.set_pc(&group, pc + 1);
        self.finish_step()
    }

    fn eval_exit(&mut self, instr: &Instruction) -> Result<()> {
        let exiting = self.core.exit_current(instr)?;
        for lane in exiting.lanes() {
            if let Some(slot) = self.thread_pcs.get_mut(lane) {
                *slot = None;
            }
        }
        if let Some(survivors) = self.core.stack.top() {
            let (lanes, pc) = (survivors.active_mask.clone(), survivors.pc);
            self.set_pc(&lanes, pc);
        }
        self.finish_step()
    }

    fn next_instruction(&mut self, instr: &Instruction) -> Result<bool> {
        self.core.ensure_initialized()?;
        if !instr.is_control() {
            if let Some(group) = self.core.stack.top() {
                let (lanes, pc) = (group.active_mask.clone(), group.pc + 1);
                self.set_pc(&lanes, pc);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Guard, Predicate};

    fn mask(lanes: &[usize]) -> LaneMask {
        LaneMask::from_lanes(4, lanes.iter().copied())
    }

    fn mechanism(instructions: Vec<Instruction>) -> TfGen6Mechanism {
        let mut mechanism = TfGen6Mechanism::new(Arc::new(Kernel::new("tf", instructions)), 4);
        mechanism.initialize().unwrap();
        mechanism
    }

    fn guarded(target: Pc) -> Instruction {
        Instruction::BRA {
            target,
            guard: Some(Guard::when(Predicate::new(0))),
            reconverge: None,
        }
    }

    #[test]
    fn initialize_puts_every_lane_at_entry() {
        let mechanism = mechanism(vec![Instruction::exit()]);
        assert_eq!(mechanism.thread_pcs(), &[Some(0); 4]);
        assert_eq!(mechanism.stack_size(), 1);
    }

    #[test]
    fn divergence_selects_largest_group() {
        // 0: @p0 bra 3 ; 1-2: nop ; 3: exit
        let instructions = vec![guarded(3), Instruction::NOP, Instruction::NOP, Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        assert!(mechanism.eval_bra(&instructions[0], &mask(&[0]), &mask(&[1, 2, 3])).unwrap());

        assert_eq!(mechanism.thread_pcs(), &[Some(3), Some(1), Some(1), Some(1)]);
        let ctx = mechanism.context().unwrap();
        assert_eq!(ctx.pc, 1);
        assert_eq!(ctx.active_mask, mask(&[1, 2, 3]));
        assert_eq!(mechanism.stack_size(), 1);
    }

    #[test]
    fn equal_groups_pick_lowest_pc() {
        let instructions = vec![guarded(3), Instruction::NOP, Instruction::NOP, Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        mechanism.eval_bra(&instructions[0], &mask(&[0, 1]), &mask(&[2, 3])).unwrap();
        let ctx = mechanism.context().unwrap();
        assert_eq!(ctx.pc, 1);
        assert_eq!(ctx.active_mask, mask(&[2, 3]));
    }

    #[test]
    fn lanes_merge_when_they_meet() {
        let instructions = vec![guarded(3), Instruction::NOP, Instruction::NOP, Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        mechanism.eval_bra(&instructions[0], &mask(&[0]), &mask(&[1, 2, 3])).unwrap();
        mechanism.next_instruction(&instructions[0]).unwrap();
        mechanism.next_instruction(&Instruction::NOP).unwrap();
        mechanism.next_instruction(&Instruction::NOP).unwrap();

        let ctx = mechanism.context().unwrap();
        assert_eq!(ctx.pc, 3);
        assert_eq!(ctx.active_mask, LaneMask::full(4));
    }

    #[test]
    fn uniform_branch_updates_context_pc() {
        let instructions = vec![guarded(3), Instruction::NOP, Instruction::NOP, Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        assert!(!mechanism.eval_bra(&instructions[0], &mask(&[]), &LaneMask::full(4)).unwrap());
        assert_eq!(mechanism.context().unwrap().pc, 1);
        assert_eq!(mechanism.thread_pcs(), &[Some(1); 4]);
    }

    #[test]
    fn exit_retires_lanes() {
        let instructions = vec![guarded(3), Instruction::NOP, Instruction::NOP, Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        mechanism.eval_bra(&instructions[0], &mask(&[0]), &mask(&[1, 2, 3])).unwrap();
        mechanism.eval_exit(&Instruction::exit()).unwrap();
        assert!(mechanism.next_instruction(&Instruction::exit()).unwrap());

        assert_eq!(mechanism.thread_pcs(), &[Some(3), None, None, None]);
        assert_eq!(mechanism.live_lanes(), mask(&[0]));
        assert_eq!(mechanism.context().unwrap().active_mask, mask(&[0]));
        assert_eq!(mechanism.state(), MechanismState::Running);

        mechanism.eval_exit(&Instruction::exit()).unwrap();
        assert!(!mechanism.next_instruction(&Instruction::exit()).unwrap());
        assert_eq!(mechanism.state(), MechanismState::Finished);
    }

    #[test]
    fn barrier_parks_groups_until_all_arrive() {
        // 0: @p0 bra 2 ; 1: nop ; 2: bar.sync 0 ; 3: exit
        let bar = Instruction::BAR { id: 0 };
        let instructions = vec![guarded(2), Instruction::NOP, bar.clone(), Instruction::exit()];
        let mut mechanism = mechanism(instructions.clone());
        mechanism.eval_bra(&instructions[0], &mask(&[0, 1, 2]), &mask(&[3])).unwrap();
        assert_eq!(mechanism.context().unwrap().pc, 2);

        mechanism.eval_bar(&bar).unwrap();
        mechanism.next_instruction(&bar).unwrap();
        assert_eq!(mechanism.context().unwrap().active_mask, mask(&[3]));

        mechanism.next_instruction(&Instruction::NOP).unwrap();
        mechanism.eval_bar(&bar).unwrap();
        mechanism.next_instruction(&bar).unwrap();
        let ctx = mechanism.context().unwrap();
        assert_eq!(ctx.pc, 3);
        assert_eq!(ctx.active_mask, LaneMask::full(4));
    }
}
