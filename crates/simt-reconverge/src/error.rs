//! Error types for reconvergence and CTA emulation

use crate::isa::Pc;
use crate::mask::LaneMask;

/// Result type for reconvergence operations
pub type Result<T> = std::result::Result<T, ReconvergenceError>;

/// Errors raised by a reconvergence mechanism or the CTA driving it
///
/// None of these are transient: the emulation is deterministic, so every
/// error aborts the affected CTA.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconvergenceError {
    /// The lane-partition invariant would be broken
    #[error("structural violation: {0}")]
    StructuralViolation(String),

    /// Some lanes can never arrive at the barrier
    #[error("barrier at pc {barrier_pc} can never complete: lanes {missing} cannot arrive")]
    UnreachableBarrier { barrier_pc: Pc, missing: LaneMask },

    /// Mechanism selection named no concrete mechanism
    #[error("unknown reconvergence mechanism: {0}")]
    UnknownMechanismType(String),

    /// The caller supplied inconsistent instruction input
    #[error("malformed instruction at pc {pc}: {reason}")]
    MalformedInstruction { pc: Pc, reason: String },

    /// An operation other than `initialize` ran on a fresh mechanism
    #[error("reconvergence mechanism used before initialize()")]
    NotInitialized,

    /// A context tried to execute past the end of the kernel
    #[error("program counter {pc} is outside kernel '{kernel}' ({len} instructions)")]
    PcOutOfRange { pc: Pc, kernel: String, len: usize },

    /// Invalid general-purpose register index
    #[error("invalid register index: r{0}")]
    InvalidRegister(u8),

    /// Invalid predicate register index
    #[error("invalid predicate index: p{0}")]
    InvalidPredicate(u8),

    /// The CTA did not finish within the configured step budget
    #[error("step limit exceeded after {0} instructions")]
    StepLimitExceeded(u64),

    /// A lane mask of the wrong width reached the mechanism
    #[error("lane mask width {actual} does not match CTA size {expected}")]
    CtaSizeMismatch { expected: usize, actual: usize },

    /// Invalid emulator configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Compiling a subkernel translation failed
    #[error("translation failed: {0}")]
    TranslationFailed(String),
}

impl ReconvergenceError {
    /// Create a structural violation error
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralViolation(msg.into())
    }

    /// Create a malformed instruction error
    pub fn malformed(pc: Pc, reason: impl Into<String>) -> Self {
        Self::MalformedInstruction {
            pc,
            reason: reason.into(),
        }
    }

    /// Whether this error is a configuration problem rather than an emulation failure
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::UnknownMechanismType(_) | Self::InvalidConfig(_))
    }
}
