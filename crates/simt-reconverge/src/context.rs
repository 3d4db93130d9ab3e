//! Execution contexts
//!
//! An `ExecutionContext` records which lanes are active, where they execute
//! next, and where their divergent siblings are expected to merge back.

use crate::isa::Pc;
use crate::mask::LaneMask;
use std::fmt;

/// A group of lanes executing in lock-step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Lanes executing under this context; never empty while the context is live
    pub active_mask: LaneMask,

    /// Next instruction these lanes execute
    pub pc: Pc,

    /// Where the divergent siblings of this context merge back (`None`: no target)
    pub reconverge_pc: Option<Pc>,

    /// Lanes whose guard held for the instruction at `pc`.
    ///
    /// Written by `eval_predicate`, consumed by the following branch or exit.
    pub predicate_mask: LaneMask,

    /// Insertion order within the owning stack; lower is older
    pub(crate) sequence: u64,
}

impl ExecutionContext {
    pub(crate) fn new(active_mask: LaneMask, pc: Pc, reconverge_pc: Option<Pc>, sequence: u64) -> Self {
        let predicate_mask = LaneMask::empty(active_mask.width());
        Self {
            active_mask,
            pc,
            reconverge_pc,
            predicate_mask,
            sequence,
        }
    }

    /// Insertion order of this context within its stack
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of active lanes
    pub fn lane_count(&self) -> usize {
        self.active_mask.count()
    }

    /// Whether the context stands on its own reconvergence point
    pub fn at_reconvergence_point(&self) -> bool {
        self.reconverge_pc == Some(self.pc)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[pc {} lanes {}", self.pc, self.active_mask)?;
        if let Some(rpc) = self.reconverge_pc {
            write!(f, " rpc {rpc}")?;
        }
        write!(f, "]")
    }
}
