//! Emulated instruction set
//!
//! - **ALU**: MOV, ADD, SETP, NOP (per-lane, no effect on control flow)
//! - **Control Flow**: BRA (guarded, with optional post-dominator), EXIT
//! - **Synchronization**: BAR
//! - **Reconvergence**: RECONVERGE marker

mod instruction;
mod kernel;
mod types;

pub use instruction::{Instruction, InstructionCategory};
pub use kernel::Kernel;
pub use types::{Condition, Guard, Operand, Pc, Predicate, Register, PREDICATE_COUNT, REGISTER_COUNT};
