//! Kernel container
//!
//! A kernel is the decoded instruction sequence every lane of a CTA runs,
//! plus its entry point. Branch targets and post-dominators are plain
//! instruction indices.

use super::instruction::Instruction;
use super::types::Pc;
use crate::error::{ReconvergenceError, Result};

/// Decoded kernel shared by every mechanism emulating it
///
/// # Example
///
/// ```
/// use simt_reconverge::{Guard, Instruction, Kernel, Predicate};
///
/// // if (p0) { nop } ; exit
/// let kernel = Kernel::new(
///     "guarded",
///     vec![
///         Instruction::branch(2, Guard::unless(Predicate::new(0)), 2),
///         Instruction::NOP,
///         Instruction::exit(),
///     ],
/// );
/// assert!(kernel.validate().is_ok());
/// assert_eq!(kernel.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Kernel {
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub entry: Pc,
}

impl Kernel {
    /// Kernel entered at its first instruction
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            name: name.into(),
            instructions,
            entry: 0,
        }
    }

    /// Override the entry point
    pub fn with_entry(mut self, entry: Pc) -> Self {
        self.entry = entry;
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Fetch the instruction at `pc`
    pub fn instruction(&self, pc: Pc) -> Result<&Instruction> {
        self.instructions.get(pc).ok_or_else(|| ReconvergenceError::PcOutOfRange {
            pc,
            kernel: self.name.clone(),
            len: self.instructions.len(),
        })
    }

    /// Check that the entry point, branch targets and reconvergence points
    /// all address instructions of this kernel
    pub fn validate(&self) -> Result<()> {
        self.instruction(self.entry)?;
        for (pc, instr) in self.instructions.iter().enumerate() {
            if let Instruction::BRA { target, reconverge, .. } = instr {
                if *target >= self.len() {
                    return Err(ReconvergenceError::malformed(pc, format!("branch target {target} out of range")));
                }
                if let Some(rpc) = reconverge {
                    if *rpc >= self.len() {
                        return Err(ReconvergenceError::malformed(
                            pc,
                            format!("reconvergence point {rpc} out of range"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
