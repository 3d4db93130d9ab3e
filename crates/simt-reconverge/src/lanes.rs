//! Per-lane register state
//!
//! The emulator owns one `LaneState` per thread of the CTA. Mechanisms never
//! touch registers directly; they read predicates through [`PredicateFile`]
//! when evaluating guards.

use crate::error::{ReconvergenceError, Result};
use crate::isa::{Operand, Predicate, Register, PREDICATE_COUNT, REGISTER_COUNT};

/// Read access to per-lane predicate registers
pub trait PredicateFile {
    fn read_predicate(&self, lane: usize, pred: Predicate) -> Result<bool>;
}

// ================================================================================================
// Lane State
// ================================================================================================

/// Registers of a single lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneState {
    registers: [u32; REGISTER_COUNT],
    predicates: [bool; PREDICATE_COUNT],
}

impl LaneState {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            predicates: [false; PREDICATE_COUNT],
        }
    }

    pub fn read(&self, reg: Register) -> Result<u32> {
        self.registers
            .get(reg.index() as usize)
            .copied()
            .ok_or(ReconvergenceError::InvalidRegister(reg.index()))
    }

    pub fn write(&mut self, reg: Register, value: u32) -> Result<()> {
        let slot = self
            .registers
            .get_mut(reg.index() as usize)
            .ok_or(ReconvergenceError::InvalidRegister(reg.index()))?;
        *slot = value;
        Ok(())
    }

    pub fn predicate(&self, pred: Predicate) -> Result<bool> {
        self.predicates
            .get(pred.index() as usize)
            .copied()
            .ok_or(ReconvergenceError::InvalidPredicate(pred.index()))
    }

    pub fn set_predicate(&mut self, pred: Predicate, value: bool) -> Result<()> {
        let slot = self
            .predicates
            .get_mut(pred.index() as usize)
            .ok_or(ReconvergenceError::InvalidPredicate(pred.index()))?;
        *slot = value;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for LaneState {
    fn default() -> Self {
        Self::new()
    }
}

// ================================================================================================
// Lane File
// ================================================================================================

/// Register state for every lane of a CTA
#[derive(Debug, Clone)]
pub struct LaneFile {
    lanes: Vec<LaneState>,
}

impl LaneFile {
    pub fn new(num_lanes: usize) -> Self {
        Self {
            lanes: vec![LaneState::new(); num_lanes],
        }
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, lane: usize) -> Option<&LaneState> {
        self.lanes.get(lane)
    }

    pub fn lane_mut(&mut self, lane: usize) -> Option<&mut LaneState> {
        self.lanes.get_mut(lane)
    }

    /// Resolve an operand for `lane`
    pub fn operand(&self, lane: usize, operand: Operand) -> Result<u32> {
        match operand {
            Operand::Imm(value) => Ok(value),
            Operand::LaneId => Ok(lane as u32),
            Operand::Reg(reg) => self.checked(lane)?.read(reg),
        }
    }

    pub(crate) fn checked(&self, lane: usize) -> Result<&LaneState> {
        self.lanes
            .get(lane)
            .ok_or_else(|| ReconvergenceError::structural(format!("lane {lane} outside CTA of {}", self.lanes.len())))
    }

    pub(crate) fn checked_mut(&mut self, lane: usize) -> Result<&mut LaneState> {
        let len = self.lanes.len();
        self.lanes
            .get_mut(lane)
            .ok_or_else(|| ReconvergenceError::structural(format!("lane {lane} outside CTA of {len}")))
    }

    /// Reset every lane for a re-launch
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.reset();
        }
    }
}

impl PredicateFile for LaneFile {
    fn read_predicate(&self, lane: usize, pred: Predicate) -> Result<bool> {
        self.checked(lane)?.predicate(pred)
    }
}
