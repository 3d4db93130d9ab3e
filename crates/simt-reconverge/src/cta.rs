//! CTA emulation driver
//!
//! A [`CooperativeThreadArray`] runs one kernel over one CTA, asking its
//! reconvergence mechanism which lanes execute each instruction. Per step:
//!
//! 1. read the current context and fetch the instruction at its pc
//! 2. `eval_predicate`
//! 3. apply ALU instructions to the active lanes, or hand control
//!    instructions to the matching `eval_*` operation
//! 4. `next_instruction`
//!
//! # Example
//!
//! ```
//! use simt_reconverge::{CooperativeThreadArray, EmulatorConfig, Instruction, Kernel, MechanismType};
//! use std::sync::Arc;
//!
//! let kernel = Arc::new(Kernel::new("nop", vec![Instruction::NOP, Instruction::exit()]));
//! let config = EmulatorConfig::new(MechanismType::Ipdom, 4);
//! let report = CooperativeThreadArray::new(kernel, &config)?.run()?;
//! assert_eq!(report.dynamic_instructions, 2);
//! # Ok::<(), simt_reconverge::ReconvergenceError>(())
//! ```

use crate::config::EmulatorConfig;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, InstructionCategory, Kernel, Pc};
use crate::lanes::LaneFile;
use crate::mask::LaneMask;
use crate::mechanism::{create_mechanism, MechanismState, MechanismType, ReconvergenceMechanism};
use simt_tracing::perf_span;
use simt_tracing::performance::record_cta_completion;
use std::sync::Arc;
use tracing::{debug, trace};

// ================================================================================================
// Execution Trace
// ================================================================================================

/// One executed instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub pc: Pc,
    /// Lanes that executed it
    pub active: LaneMask,
    /// Contexts held by the mechanism when it issued
    pub stack_depth: usize,
}

/// Instructions in issue order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    events: Vec<TraceEvent>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Issued program counters
    pub fn pcs(&self) -> Vec<Pc> {
        self.events.iter().map(|event| event.pc).collect()
    }

    /// Lanes that issued the instruction at `pc`, once per issue
    pub fn issues_at(&self, pc: Pc) -> Vec<&LaneMask> {
        self.events
            .iter()
            .filter(|event| event.pc == pc)
            .map(|event| &event.active)
            .collect()
    }
}

// ================================================================================================
// CTA Report
// ================================================================================================

/// Outcome of a CTA that ran to completion
#[derive(Debug, Clone)]
pub struct CtaReport {
    pub cta_id: usize,
    pub mechanism: MechanismType,
    /// Instructions issued, counting each issue once regardless of lane count
    pub dynamic_instructions: u64,
    pub divergent_branches: u64,
    pub max_stack_depth: usize,
    /// Sum over issues of the lanes active for that issue
    pub active_lane_steps: u64,
    pub cta_size: usize,
    pub trace: ExecutionTrace,
    pub lanes: LaneFile,
}

impl CtaReport {
    /// Fraction of issue slots doing useful work, in `0.0..=1.0`
    pub fn simd_efficiency(&self) -> f64 {
        if self.dynamic_instructions == 0 {
            return 1.0;
        }
        self.active_lane_steps as f64 / (self.dynamic_instructions as f64 * self.cta_size as f64)
    }
}

// ================================================================================================
// Cooperative Thread Array
// ================================================================================================

/// One CTA and the mechanism scheduling its lanes
#[derive(Debug)]
pub struct CooperativeThreadArray {
    id: usize,
    kernel: Arc<Kernel>,
    config: EmulatorConfig,
    mechanism: Box<dyn ReconvergenceMechanism>,
    lanes: LaneFile,
    trace: ExecutionTrace,
    record_trace: bool,
    steps: u64,
    divergent_branches: u64,
    active_lane_steps: u64,
}

impl CooperativeThreadArray {
    pub fn new(kernel: Arc<Kernel>, config: &EmulatorConfig) -> Result<Self> {
        config.validate()?;
        kernel.validate()?;
        let mechanism = create_mechanism(config.mechanism, Arc::clone(&kernel), config.cta_size)?;
        Ok(Self {
            id: 0,
            kernel,
            config: config.clone(),
            mechanism,
            lanes: LaneFile::new(config.cta_size),
            trace: ExecutionTrace::new(),
            record_trace: true,
            steps: 0,
            divergent_branches: 0,
            active_lane_steps: 0,
        })
    }

    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Whether to keep a per-instruction trace
    pub fn with_trace(mut self, record_trace: bool) -> Self {
        self.record_trace = record_trace;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn lanes(&self) -> &LaneFile {
        &self.lanes
    }

    /// Register state, for seeding inputs before `run`
    pub fn lanes_mut(&mut self) -> &mut LaneFile {
        &mut self.lanes
    }

    pub fn mechanism(&self) -> &dyn ReconvergenceMechanism {
        self.mechanism.as_ref()
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Reset the mechanism to the root context; registers are kept
    pub fn launch(&mut self) -> Result<()> {
        self.mechanism.initialize()?;
        self.trace = ExecutionTrace::new();
        self.steps = 0;
        self.divergent_branches = 0;
        self.active_lane_steps = 0;
        debug!(cta = self.id, kernel = %self.kernel.name, mechanism = %self.config.mechanism, "CTA launched");
        Ok(())
    }

    /// Issue one instruction. Returns `false` once every lane has exited.
    pub fn step(&mut self) -> Result<bool> {
        if self.mechanism.state() == MechanismState::Uninitialized {
            return Err(ReconvergenceError::NotInitialized);
        }
        let Some(current) = self.mechanism.context() else {
            return Ok(false);
        };
        if self.steps >= self.config.max_steps {
            return Err(ReconvergenceError::StepLimitExceeded(self.steps));
        }
        let pc = current.pc;
        let instr = self.kernel.instruction(pc)?.clone();

        self.mechanism.eval_predicate(&self.lanes)?;
        let current = self
            .mechanism
            .context()
            .ok_or_else(|| ReconvergenceError::structural("context vanished during predicate evaluation"))?;
        let active = current.active_mask.clone();
        let predicate = current.predicate_mask.clone();
        trace!(cta = self.id, pc, instr = %instr, lanes = %active, "issue");
        self.record(pc, &active);

        match instr.category() {
            InstructionCategory::Alu => self.apply_alu(&instr, &active)?,
            InstructionCategory::Branch => {
                let fallthrough = active.difference(&predicate);
                if self.mechanism.eval_bra(&instr, &predicate, &fallthrough)? {
                    self.divergent_branches += 1;
                }
            }
            InstructionCategory::Barrier => self.mechanism.eval_bar(&instr)?,
            InstructionCategory::Reconverge => self.mechanism.eval_reconverge(&instr)?,
            InstructionCategory::Exit => self.mechanism.eval_exit(&instr)?,
        }
        self.steps += 1;
        self.mechanism.next_instruction(&instr)
    }

    /// Launch and step until every lane exits
    pub fn run(mut self) -> Result<CtaReport> {
        let _span = perf_span!(
            "cta_run",
            mechanism = self.config.mechanism.as_str(),
            cta_size = self.config.cta_size,
            instructions = self.kernel.len()
        );
        self.launch()?;
        while self.step()? {}

        let report = CtaReport {
            cta_id: self.id,
            mechanism: self.config.mechanism,
            dynamic_instructions: self.steps,
            divergent_branches: self.divergent_branches,
            max_stack_depth: self.mechanism.max_stack_depth(),
            active_lane_steps: self.active_lane_steps,
            cta_size: self.config.cta_size,
            trace: self.trace,
            lanes: self.lanes,
        };
        record_cta_completion(report.mechanism.as_str(), report.dynamic_instructions, report.max_stack_depth);
        Ok(report)
    }

    fn record(&mut self, pc: Pc, active: &LaneMask) {
        self.active_lane_steps += active.count() as u64;
        if self.record_trace {
            self.trace.push(TraceEvent {
                pc,
                active: active.clone(),
                stack_depth: self.mechanism.stack_size(),
            });
        }
    }

    fn apply_alu(&mut self, instr: &Instruction, active: &LaneMask) -> Result<()> {
        for lane in active.lanes() {
            match instr {
                Instruction::MOV { dst, src } => {
                    let value = self.lanes.operand(lane, *src)?;
                    self.lanes.checked_mut(lane)?.write(*dst, value)?;
                }
                Instruction::ADD { dst, a, b } => {
                    let value = self.lanes.operand(lane, *a)?.wrapping_add(self.lanes.operand(lane, *b)?);
                    self.lanes.checked_mut(lane)?.write(*dst, value)?;
                }
                Instruction::SETP { cond, dst, a, b } => {
                    let value = cond.eval(self.lanes.operand(lane, *a)?, self.lanes.operand(lane, *b)?);
                    self.lanes.checked_mut(lane)?.set_predicate(*dst, value)?;
                }
                Instruction::NOP => {}
                other => {
                    return Err(ReconvergenceError::malformed(
                        self.mechanism.context().map_or(0, |ctx| ctx.pc),
                        format!("'{other}' is not an ALU instruction"),
                    ))
                }
            }
        }
        Ok(())
    }
}
