//! Core operand types of the emulated ISA

use std::fmt;

/// Instruction address: an index into the kernel's instruction sequence
pub type Pc = usize;

/// Number of general-purpose registers per lane
pub const REGISTER_COUNT: usize = 16;

/// Number of predicate registers per lane
pub const PREDICATE_COUNT: usize = 8;

// ================================================================================================
// Register Types
// ================================================================================================

/// General-purpose u32 register (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Register(pub u8);

impl Register {
    pub const fn new(index: u8) -> Self {
        Register(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Predicate register (0-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Predicate(pub u8);

impl Predicate {
    pub const fn new(index: u8) -> Self {
        Predicate(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Predicate guard on a branch or exit: `@p` or `@!p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Guard {
    pub pred: Predicate,
    pub negate: bool,
}

impl Guard {
    /// Guard that holds when `pred` is true
    pub const fn when(pred: Predicate) -> Self {
        Self { pred, negate: false }
    }

    /// Guard that holds when `pred` is false
    pub const fn unless(pred: Predicate) -> Self {
        Self { pred, negate: true }
    }

    /// Apply the guard to a predicate value
    pub const fn holds(self, value: bool) -> bool {
        value != self.negate
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "@!{}", self.pred)
        } else {
            write!(f, "@{}", self.pred)
        }
    }
}

// ================================================================================================
// Operands and Conditions
// ================================================================================================

/// Source operand of an ALU instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operand {
    Reg(Register),
    Imm(u32),
    /// Index of the executing lane within the CTA
    LaneId,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::LaneId => write!(f, "%laneid"),
        }
    }
}

/// Comparison condition for SETP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Condition {
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
}

impl Condition {
    /// Evaluate `a cond b` on unsigned values
    pub const fn eval(self, a: u32, b: u32) -> bool {
        match self {
            Condition::EQ => a == b,
            Condition::NE => a != b,
            Condition::LT => a < b,
            Condition::LE => a <= b,
            Condition::GT => a > b,
            Condition::GE => a >= b,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::EQ => "eq",
            Condition::NE => "ne",
            Condition::LT => "lt",
            Condition::LE => "le",
            Condition::GT => "gt",
            Condition::GE => "ge",
        };
        f.write_str(s)
    }
}
