//! Reconvergence mechanisms
//!
//! A mechanism decides, after every control instruction, which lanes of a
//! CTA execute next and when divergent lane groups merge back together. All
//! mechanisms implement [`ReconvergenceMechanism`] and are created through
//! [`create_mechanism`]:
//!
//! - [`IpdomMechanism`]: stack-based reconvergence at immediate post-dominators
//! - [`BarrierMechanism`]: no reconvergence except at CTA barriers and exit
//! - [`TfGen6Mechanism`]: thread frontiers over a per-lane PC table
//! - [`TfSortedStackMechanism`]: thread frontiers kept as a PC-sorted stack
//!
//! The calling protocol for each instruction is: [`eval_predicate`], then
//! the `eval_*` operation matching the instruction category (none for ALU
//! instructions), then [`next_instruction`].
//!
//! [`eval_predicate`]: ReconvergenceMechanism::eval_predicate
//! [`next_instruction`]: ReconvergenceMechanism::next_instruction

mod barrier;
pub(crate) mod common;
mod ipdom;
mod tf_gen6;
mod tf_sorted_stack;

pub use barrier::BarrierMechanism;
pub use ipdom::IpdomMechanism;
pub use tf_gen6::TfGen6Mechanism;
pub use tf_sorted_stack::TfSortedStackMechanism;

use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::{Instruction, Kernel};
use crate::lanes::PredicateFile;
use crate::mask::LaneMask;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ================================================================================================
// Mechanism Type
// ================================================================================================

/// Selects a reconvergence mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum MechanismType {
    #[default]
    #[serde(rename = "ipdom")]
    Ipdom,
    #[serde(rename = "barrier")]
    Barrier,
    #[serde(rename = "tf-gen6")]
    TfGen6,
    #[serde(rename = "tf-sorted-stack")]
    TfSortedStack,
    #[serde(rename = "unknown")]
    Unknown,
}

impl MechanismType {
    /// Every concrete mechanism
    pub const ALL: [MechanismType; 4] = [
        MechanismType::Ipdom,
        MechanismType::Barrier,
        MechanismType::TfGen6,
        MechanismType::TfSortedStack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MechanismType::Ipdom => "ipdom",
            MechanismType::Barrier => "barrier",
            MechanismType::TfGen6 => "tf-gen6",
            MechanismType::TfSortedStack => "tf-sorted-stack",
            MechanismType::Unknown => "unknown",
        }
    }

    /// Whether the mechanism schedules by thread frontier
    pub fn is_frontier(self) -> bool {
        matches!(self, MechanismType::TfGen6 | MechanismType::TfSortedStack)
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MechanismType {
    type Err = ReconvergenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ipdom" => Ok(MechanismType::Ipdom),
            "barrier" => Ok(MechanismType::Barrier),
            "tf-gen6" | "tfgen6" => Ok(MechanismType::TfGen6),
            "tf-sorted-stack" | "tfsortedstack" => Ok(MechanismType::TfSortedStack),
            "unknown" => Ok(MechanismType::Unknown),
            _ => Err(ReconvergenceError::UnknownMechanismType(s.to_string())),
        }
    }
}

/// Lifecycle of a mechanism instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismState {
    /// Created, `initialize` not yet called
    Uninitialized,
    /// Lanes remain
    Running,
    /// Every lane exited
    Finished,
}

// ================================================================================================
// Mechanism Contract
// ================================================================================================

/// Reconvergence policy for one CTA
///
/// Every operation acts on the current context, the one [`context`]
/// returns. Operations other than `initialize` fail with
/// [`ReconvergenceError::NotInitialized`] on a fresh instance.
///
/// [`context`]: ReconvergenceMechanism::context
pub trait ReconvergenceMechanism: Send + fmt::Debug {
    fn mechanism_type(&self) -> MechanismType;

    fn state(&self) -> MechanismState;

    /// Reset to a single context covering the whole CTA at the kernel entry
    fn initialize(&mut self) -> Result<()>;

    /// Compute the predicate mask of the current context for the guard of
    /// the instruction at its pc. Unguarded instructions select every active lane.
    fn eval_predicate(&mut self, predicates: &dyn PredicateFile) -> Result<()>;

    /// Apply a branch: `taken` lanes go to the target, `fallthrough` lanes
    /// to the next instruction. Returns whether the branch diverged.
    fn eval_bra(&mut self, instr: &Instruction, taken: &LaneMask, fallthrough: &LaneMask) -> Result<bool>;

    /// Apply a CTA-wide barrier
    fn eval_bar(&mut self, instr: &Instruction) -> Result<()>;

    /// Apply an explicit reconvergence marker
    fn eval_reconverge(&mut self, instr: &Instruction) -> Result<()>;

    /// Retire the lanes whose guard held
    fn eval_exit(&mut self, instr: &Instruction) -> Result<()>;

    /// Finish the step for `instr` and choose what runs next.
    ///
    /// Returns `false` once no lane remains.
    fn next_instruction(&mut self, instr: &Instruction) -> Result<bool>;

    /// The context that executes next, if any
    fn context(&self) -> Option<&ExecutionContext>;

    /// Number of contexts currently held
    fn stack_size(&self) -> usize;

    /// Deepest the stack has been since `initialize`
    fn max_stack_depth(&self) -> usize;

    /// Lanes that have not exited
    fn live_lanes(&self) -> LaneMask;

    fn kernel(&self) -> &Arc<Kernel>;
}

/// Create the mechanism selected by `mechanism_type` for a CTA of `cta_size` lanes.
///
/// The instance still needs [`ReconvergenceMechanism::initialize`].
pub fn create_mechanism(
    mechanism_type: MechanismType,
    kernel: Arc<Kernel>,
    cta_size: usize,
) -> Result<Box<dyn ReconvergenceMechanism>> {
    if cta_size == 0 {
        return Err(ReconvergenceError::InvalidConfig("CTA size must be at least one lane".to_string()));
    }
    let mechanism: Box<dyn ReconvergenceMechanism> = match mechanism_type {
        MechanismType::Ipdom => Box::new(IpdomMechanism::new(kernel, cta_size)),
        MechanismType::Barrier => Box::new(BarrierMechanism::new(kernel, cta_size)),
        MechanismType::TfGen6 => Box::new(TfGen6Mechanism::new(kernel, cta_size)),
        MechanismType::TfSortedStack => Box::new(TfSortedStackMechanism::new(kernel, cta_size)),
        MechanismType::Unknown => {
            return Err(ReconvergenceError::UnknownMechanismType(mechanism_type.to_string()))
        }
    };
    tracing::debug!(mechanism = %mechanism_type, cta_size, "created reconvergence mechanism");
    Ok(mechanism)
}
