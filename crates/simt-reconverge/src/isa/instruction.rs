//! Decoded instructions
//!
//! Only the control instructions (BRA, BAR, RECONVERGE, EXIT) reach a
//! reconvergence mechanism as operations; the ALU instructions exist so a
//! kernel can compute the per-lane predicates that make branches diverge.

use super::types::{Condition, Guard, Operand, Pc, Predicate, Register};
use std::fmt;

/// Emulated instruction set
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Instruction {
    // ============================================================================================
    // ALU
    // ============================================================================================
    /// dst = src
    MOV { dst: Register, src: Operand },

    /// dst = a + b (wrapping)
    ADD { dst: Register, a: Operand, b: Operand },

    /// dst = (a cond b)
    SETP {
        cond: Condition,
        dst: Predicate,
        a: Operand,
        b: Operand,
    },

    /// No operation
    NOP,

    // ============================================================================================
    // Control Flow
    // ============================================================================================
    /// Branch to `target` for lanes whose guard holds; the rest fall through.
    ///
    /// `reconverge` is the immediate post-dominator supplied by static
    /// analysis. Only the IPDOM mechanism consumes it.
    BRA {
        target: Pc,
        guard: Option<Guard>,
        reconverge: Option<Pc>,
    },

    /// CTA-wide barrier
    BAR { id: u8 },

    /// Explicit reconvergence marker
    RECONVERGE,

    /// Retire lanes whose guard holds (all active lanes when unguarded)
    EXIT { guard: Option<Guard> },
}

/// Instruction categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionCategory {
    Alu,
    Branch,
    Barrier,
    Reconverge,
    Exit,
}

impl Instruction {
    /// Unconditional branch
    pub const fn jump(target: Pc) -> Self {
        Instruction::BRA {
            target,
            guard: None,
            reconverge: None,
        }
    }

    /// Guarded branch with its post-dominator
    pub const fn branch(target: Pc, guard: Guard, reconverge: Pc) -> Self {
        Instruction::BRA {
            target,
            guard: Some(guard),
            reconverge: Some(reconverge),
        }
    }

    /// Unguarded exit
    pub const fn exit() -> Self {
        Instruction::EXIT { guard: None }
    }

    pub fn category(&self) -> InstructionCategory {
        match self {
            Instruction::MOV { .. } | Instruction::ADD { .. } | Instruction::SETP { .. } | Instruction::NOP => {
                InstructionCategory::Alu
            }
            Instruction::BRA { .. } => InstructionCategory::Branch,
            Instruction::BAR { .. } => InstructionCategory::Barrier,
            Instruction::RECONVERGE => InstructionCategory::Reconverge,
            Instruction::EXIT { .. } => InstructionCategory::Exit,
        }
    }

    /// Whether the instruction places program counters itself.
    ///
    /// `next_instruction` only advances contexts past instructions for which
    /// this is false.
    pub fn is_control(&self) -> bool {
        self.category() != InstructionCategory::Alu
    }

    /// The predicate guard, if any
    pub fn guard(&self) -> Option<Guard> {
        match self {
            Instruction::BRA { guard, .. } | Instruction::EXIT { guard } => *guard,
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(guard) = self.guard() {
            write!(f, "{guard} ")?;
        }
        match self {
            Instruction::MOV { dst, src } => write!(f, "mov {dst}, {src}"),
            Instruction::ADD { dst, a, b } => write!(f, "add {dst}, {a}, {b}"),
            Instruction::SETP { cond, dst, a, b } => write!(f, "setp.{cond} {dst}, {a}, {b}"),
            Instruction::NOP => write!(f, "nop"),
            Instruction::BRA { target, reconverge, .. } => match reconverge {
                Some(rpc) => write!(f, "bra {target} (ipdom {rpc})"),
                None => write!(f, "bra {target}"),
            },
            Instruction::BAR { id } => write!(f, "bar.sync {id}"),
            Instruction::RECONVERGE => write!(f, "reconverge"),
            Instruction::EXIT { .. } => write!(f, "exit"),
        }
    }
}
